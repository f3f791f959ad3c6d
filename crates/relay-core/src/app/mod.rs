//! App - アプリケーション層
//!
//! ports・registry・worker・bus を組み合わせてアプリケーションを動かします。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **TaskManager**: 呼び出し側の API（登録・進捗照会）
//! - **RegistryService**: バス上の registry 窓口
//! - **WorkerGroup**: タスク実行ループ（lease→create→run→complete/fail）
//! - **RecommendationPipeline**: 4 段パイプラインの登録と状態確認
//! - **ReaperLoop**: 期限切れタスクの回収
//! - **GCLoop**: 期限切れテーブルの回収

pub mod builder;
pub mod gc_loop;
pub mod orchestrator;
pub mod reaper_loop;
pub mod registry_service;
pub mod task_manager;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError, RunningApp};
pub use self::gc_loop::GCLoop;
pub use self::orchestrator::{
    CONTACT_ARTISTS_FINAL_TABLE, CONTACT_ARTISTS_TABLE, CONTACT_RECOMMENDATIONS_TABLE,
    PipelineSettings, RecommendationPipeline,
};
pub use self::reaper_loop::ReaperLoop;
pub use self::registry_service::RegistryService;
pub use self::task_manager::{TaskManager, TaskManagerOptions};
pub use self::worker_loop::WorkerGroup;

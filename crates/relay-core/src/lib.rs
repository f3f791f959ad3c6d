//! relay-core
//!
//! Core building blocks for the relay task pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task spec, status, records, facets, bus messages, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, EventSink, RecordStore, Recommender）
//! - **table**: 期限付きテーブルストア（schema, row, in-memory 実装）
//! - **registry**: タスク登録・依存関係・ライフサイクル
//! - **bus**: プロセス内メッセージバスと順序付き handler lane
//! - **worker**: worker 契約とパイプラインの各 worker
//! - **app**: アプリケーションロジック（builder, task manager, worker loop, orchestrator, など）
//! - **impls**: ports の実装（in-memory record store, catalog / Spotify recommender）
//! - **config**: 実行時設定
//! - **observability**: tracing の初期化と registry の集計

pub mod app;
pub mod bus;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod registry;
pub mod table;
pub mod worker;

pub use crate::config::RelayConfig;
pub use crate::domain::RelayError;

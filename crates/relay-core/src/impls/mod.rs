//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryRecordStore**: 開発用・テスト用の RecordStore
//! - **CatalogRecommender**: 外部 API を使わない Recommender
//! - **SpotifyRecommender**: Spotify Web API を使う Recommender
//!
//! TableStore の実装は `table::InMemoryTableStoreFactory` を参照。

pub mod catalog;
pub mod memory_records;
pub mod spotify;

pub use self::catalog::CatalogRecommender;
pub use self::memory_records::InMemoryRecordStore;
pub use self::spotify::SpotifyRecommender;

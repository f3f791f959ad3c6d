//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（record store, recommender API, 時刻, ID 生成）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//! 実装は `impls` にあります。

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod recommender;
pub mod record_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::recommender::Recommender;
pub use self::record_store::{RecordBatches, RecordStore};

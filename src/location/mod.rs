//! 行程实时位置共享
//!
//! 数据流：车主上报 -> [`LocationStore`] 写入 -> [`ChangeFeed`] 广播 ->
//! 每个 [`LocationSession`] 更新快照 -> 各自的 ETA 倒计时重置。

pub mod feed;
pub mod model;
pub mod session;
pub mod store;
pub mod ticker;

pub use feed::{ChangeFeed, ChangeHandler, MemoryChangeFeed, RedisChangeFeed, Subscription};
pub use model::{LatLng, LocationRecord, LocationSnapshot, NewLocation};
pub use session::{LocationSession, LocationUpdater, SessionRole};
pub use store::{LocationRepository, LocationStore, MemoryLocationRepository, PgLocationRepository};
pub use ticker::{Countdown, EtaTicker};

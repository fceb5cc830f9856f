//! 领域模型
//!
//! 本服务读写的实体只包含处理管道实际使用的字段，
//! 完整的物流平台模型由平台自身维护。

mod enums;
mod identity;
mod ledger;
mod logistics;

pub use enums::*;
pub use identity::*;
pub use ledger::*;
pub use logistics::*;

//! 仓储层
//!
//! 提供处理管道涉及的所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行类型安全的数据库操作
//! - 唯一性与状态迁移的原子性由存储层保证（唯一索引、条件更新）
//! - 定义 trait 接口以支持 mock 测试，内存实现用于集成测试

mod company_repo;
mod identity_repo;
mod ledger_repo;
pub mod memory;
mod order_repo;
mod place_repo;
mod traits;

pub use company_repo::CompanyRepository;
pub use identity_repo::IdentityRepository;
pub use ledger_repo::EventLedgerRepository;
pub use memory::{FaultPoint, InMemoryStore};
pub use order_repo::OrderRepository;
pub use place_repo::PlaceRepository;
pub use traits::*;

//! 服务注册模块
//!
//! 负责本进程实例在协调存储中的注册、续约、元数据更新和注销。

pub mod etcd;
pub mod service_manager;
pub mod trait_def;

pub use etcd::{EtcdRegistry, RegisterFailedCallback, RegistrationOptions, keep_alive_interval};
pub use service_manager::RegistryManager;
pub use trait_def::ServiceRegistry;

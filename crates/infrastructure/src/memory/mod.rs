//! 内存压力控制
//!
//! 读数来自 [`MemoryProbe`]，默认实现基于 sysinfo。强制回收只是一个提示：
//! 它运行已注册的回收钩子（例如缓存的过期清理），没有钩子时什么也不做。

pub mod controller;
pub mod object_pool;
pub mod probe;
pub mod streaming;

pub use controller::{MemoryController, MemoryStats, PressureLevel, ReclaimHook};
pub use object_pool::{ObjectPool, PoolStats, PooledObject};
pub use probe::{MemoryProbe, MemorySnapshot, SystemMemoryProbe};

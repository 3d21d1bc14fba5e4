use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sysinfo::{Pid, ProcessExt, System, SystemExt};

use analyzer_core::{AnalyzerError, AnalyzerResult};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 一次内存读数（MB）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemorySnapshot {
    pub total_mb: f64,
    pub available_mb: f64,
    pub process_mb: f64,
}

/// 内存读数来源
pub trait MemoryProbe: Send + Sync {
    fn snapshot(&self) -> AnalyzerResult<MemorySnapshot>;
}

/// 基于 sysinfo 的系统内存探针
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Pid,
}

impl SystemMemoryProbe {
    pub fn new() -> AnalyzerResult<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| AnalyzerError::Internal(format!("无法获取当前进程ID: {e}")))?;
        Ok(Self {
            system: Mutex::new(System::new()),
            pid,
        })
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> AnalyzerResult<MemorySnapshot> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        if !system.refresh_process(self.pid) {
            return Err(AnalyzerError::Internal(format!(
                "无法读取进程 {} 的内存信息",
                self.pid
            )));
        }

        let process_bytes = system
            .process(self.pid)
            .map(|process| process.memory())
            .unwrap_or_default();

        Ok(MemorySnapshot {
            total_mb: system.total_memory() as f64 / BYTES_PER_MB,
            available_mb: system.available_memory() as f64 / BYTES_PER_MB,
            process_mb: process_bytes as f64 / BYTES_PER_MB,
        })
    }
}

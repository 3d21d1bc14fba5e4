use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::MemoryController;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// 固定容量的对象池，用于重用批处理中频繁创建的对象
pub struct ObjectPool<T> {
    inner: Arc<PoolInner<T>>,
}

struct PoolInner<T> {
    id: u64,
    idle: Mutex<VecDeque<T>>,
    factory: Factory<T>,
    reset: Reset<T>,
    max_size: usize,
    created: AtomicUsize,
    reused: AtomicUsize,
    outstanding: AtomicUsize,
}

/// 对象池统计信息
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub max_size: usize,
    pub created_count: usize,
    pub reused_count: usize,
    pub outstanding: usize,
    pub hit_rate: f64,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    pub fn new<F, R>(factory: F, reset: R, max_size: usize) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                idle: Mutex::new(VecDeque::with_capacity(max_size)),
                factory: Box::new(factory),
                reset: Box::new(reset),
                max_size,
                created: AtomicUsize::new(0),
                reused: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 取出一个对象，池为空时新建
    pub fn acquire(&self) -> PooledObject<T> {
        let pooled = self.inner.idle().pop_front();
        let object = match pooled {
            Some(object) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                object
            }
            None => {
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                (self.inner.factory)()
            }
        };
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);

        PooledObject {
            object: Some(object),
            pool: Arc::clone(&self.inner),
        }
    }

    /// 归还对象；不是从本池取出的对象不会被接收，返回 false
    pub fn release(&self, mut object: PooledObject<T>) -> bool {
        if !Arc::ptr_eq(&self.inner, &object.pool) {
            return false;
        }
        match object.object.take() {
            Some(value) => self.inner.give_back(value),
            None => false,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let created = self.inner.created.load(Ordering::Relaxed);
        let reused = self.inner.reused.load(Ordering::Relaxed);
        PoolStats {
            pool_size: self.inner.idle().len(),
            max_size: self.inner.max_size,
            created_count: created,
            reused_count: reused,
            outstanding: self.inner.outstanding.load(Ordering::Relaxed),
            hit_rate: if created + reused > 0 {
                reused as f64 / (created + reused) as f64
            } else {
                0.0
            },
        }
    }

    /// 清空池中空闲对象，返回清除的数量
    pub fn clear(&self) -> usize {
        let mut idle = self.inner.idle();
        let count = idle.len();
        idle.clear();
        count
    }
}

impl<T> PoolInner<T> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 重置后放回；池满时直接丢弃
    fn give_back(&self, mut object: T) -> bool {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        let mut idle = self.idle();
        if idle.len() >= self.max_size {
            return false;
        }
        (self.reset)(&mut object);
        idle.push_back(object);
        true
    }
}

/// RAII守卫，drop时自动归还对象到池
pub struct PooledObject<T> {
    object: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T> PooledObject<T> {
    pub fn pool_id(&self) -> u64 {
        self.pool.id
    }

    /// 取出内部对象，不再归还到池
    pub fn into_inner(mut self) -> Option<T> {
        let object = self.object.take();
        if object.is_some() {
            self.pool.outstanding.fetch_sub(1, Ordering::Relaxed);
        }
        object
    }
}

impl<T> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.object.as_ref() {
            Some(object) => object,
            None => unreachable!("pooled object is only taken on release"),
        }
    }
}

impl<T> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.object.as_mut() {
            Some(object) => object,
            None => unreachable!("pooled object is only taken on release"),
        }
    }
}

impl<T> Drop for PooledObject<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.give_back(object);
        }
    }
}

impl MemoryController {
    pub fn create_object_pool<T, F, R>(&self, factory: F, reset: R, max_size: usize) -> ObjectPool<T>
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        let pool = ObjectPool::new(factory, reset, max_size);
        tracing::debug!("创建对象池 {}: 容量 {}", pool.id(), max_size);
        pool
    }
}

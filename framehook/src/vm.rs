use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, MutexGuard};

use crate::{Interpreter, LayoutKind, Program};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub layout: LayoutKind,
    /// Slots per frame for the stack-top layout, slots per interpreter for the
    /// base-pointer layout.
    pub stack_size: usize,
    pub max_frames: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            layout: LayoutKind::default(),
            stack_size: 256,
            max_frames: 64,
        }
    }
}

#[derive(Debug)]
struct RuntimeShared {
    id: u64,
    config: RuntimeConfig,
    execution: Mutex<()>,
}

/// Owner of the exclusive execution lock shared by all interpreters created
/// from it.
#[derive(Debug, Clone)]
pub struct Runtime {
    inner: Arc<RuntimeShared>,
}

/// Proof that the holder owns the execution lock of one runtime.
///
/// Running code and installing tracers take a token; the lock is released
/// when the token is dropped.
#[derive(Debug)]
pub struct ExecutionToken<'a> {
    runtime: u64,
    _guard: MutexGuard<'a, ()>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let inner = RuntimeShared {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            config,
            execution: Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Blocks until the execution lock is free.
    pub fn acquire(&self) -> ExecutionToken<'_> {
        ExecutionToken {
            runtime: self.inner.id,
            _guard: self.inner.execution.lock(),
        }
    }

    pub fn try_acquire(&self) -> Option<ExecutionToken<'_>> {
        let guard = self.inner.execution.try_lock()?;
        Some(ExecutionToken {
            runtime: self.inner.id,
            _guard: guard,
        })
    }

    pub fn interpreter(&self, program: Arc<Program>) -> Interpreter {
        Interpreter::new(self.clone(), program)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl ExecutionToken<'_> {
    #[must_use]
    pub fn runtime_id(&self) -> u64 {
        self.runtime
    }

    #[must_use]
    pub fn belongs_to(&self, runtime: &Runtime) -> bool {
        self.runtime == runtime.id()
    }
}

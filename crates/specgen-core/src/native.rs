//! WebAssembly formatter bridge.
//!
//! Formatter modules have no string type at their boundary, so arguments and
//! results travel through guest linear memory as NUL-terminated bytes. One
//! call lays out a single buffer:
//!
//! ```text
//! base                                                        base + size
//! | result slot (u32 LE) | source bytes | NUL | option bytes | NUL |
//! ```
//!
//! and calls `format(source_ptr, options_ptr, result_slot_ptr) -> i32`. The
//! module stores a pointer to a NUL-terminated string (formatted source on
//! success, a diagnostic otherwise) in the result slot. Every call gets a
//! fresh store and instance; the buffer and the result string are released
//! before the call returns, whatever happened in between.

use std::path::Path;

use thiserror::Error;
use wasmtime::{Engine, Instance, Memory, Module, Store, TypedFunc};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

const RESULT_SLOT_LEN: usize = 4;

/// Errors from the native formatter bridge.
#[derive(Error, Debug)]
pub enum NativeError {
    #[error("failed to load formatter module: {0}")]
    Load(String),

    #[error("failed to instantiate formatter module: {0}")]
    Instantiation(String),

    #[error("formatter could not allocate {size} bytes")]
    Allocation { size: usize },

    #[error("access of {len} bytes at offset {offset} is outside guest memory")]
    OutOfBounds { offset: usize, len: usize },

    #[error("could not read formatter result: {0}")]
    ResultRead(String),

    #[error("formatter trapped: {0}")]
    Trap(String),

    #[error("{0}")]
    Format(String),
}

/// Names of the exports a formatter module provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeExports {
    pub alloc: String,
    pub free: String,
    pub format: String,
    pub memory: String,
}

impl Default for NativeExports {
    fn default() -> Self {
        Self {
            alloc: "alloc".to_string(),
            free: "free".to_string(),
            format: "format".to_string(),
            memory: "memory".to_string(),
        }
    }
}

impl NativeExports {
    /// Export names used by the AStyle build.
    pub fn astyle() -> Self {
        Self {
            alloc: "alloc_buffer".to_string(),
            free: "free_buffer".to_string(),
            format: "wastyle".to_string(),
            memory: "memory".to_string(),
        }
    }
}

/// Guest allocations made during one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationLedger {
    pub allocated: Vec<u32>,
    pub freed: Vec<u32>,
}

impl AllocationLedger {
    /// Every allocation was freed exactly once.
    pub fn is_balanced(&self) -> bool {
        let mut allocated = self.allocated.clone();
        let mut freed = self.freed.clone();
        allocated.sort_unstable();
        freed.sort_unstable();
        allocated == freed
    }
}

/// A compiled formatter module.
pub struct NativeFormatter {
    engine: Engine,
    module: Module,
    exports: NativeExports,
}

impl NativeFormatter {
    /// Compile the module at `path`.
    pub fn from_file(path: &Path, exports: NativeExports) -> Result<Self, NativeError> {
        let engine = Engine::default();
        let module = Module::from_file(&engine, path)
            .map_err(|e| NativeError::Load(format!("{}: {e:#}", path.display())))?;
        Ok(Self {
            engine,
            module,
            exports,
        })
    }

    /// Compile a module from binary or text format bytes.
    pub fn from_bytes(bytes: &[u8], exports: NativeExports) -> Result<Self, NativeError> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes).map_err(|e| NativeError::Load(format!("{e:#}")))?;
        Ok(Self {
            engine,
            module,
            exports,
        })
    }

    pub fn exports(&self) -> &NativeExports {
        &self.exports
    }

    /// Format `source` with the given option string.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Format`] with the module's diagnostic when it
    /// reports failure, and other variants when the module misbehaves.
    pub fn format(&self, source: &str, options: &str) -> Result<String, NativeError> {
        let mut ledger = AllocationLedger::default();
        self.format_with_ledger(source, options, &mut ledger)
    }

    /// Like [`format`](Self::format), also returning the guest allocations made.
    pub fn format_traced(
        &self,
        source: &str,
        options: &str,
    ) -> (Result<String, NativeError>, AllocationLedger) {
        let mut ledger = AllocationLedger::default();
        let result = self.format_with_ledger(source, options, &mut ledger);
        (result, ledger)
    }

    fn format_with_ledger(
        &self,
        source: &str,
        options: &str,
        ledger: &mut AllocationLedger,
    ) -> Result<String, NativeError> {
        let mut guest = self.instantiate(ledger)?;

        let source = source.as_bytes();
        let options = options.as_bytes();
        let size = RESULT_SLOT_LEN
            .checked_add(source.len())
            .and_then(|n| n.checked_add(options.len()))
            .and_then(|n| n.checked_add(2))
            .ok_or(NativeError::Allocation { size: usize::MAX })?;

        let base = guest.alloc(size)?;
        let result_slot = offset(base, 0)?;
        let source_ptr = offset(base, RESULT_SLOT_LEN)?;
        let options_ptr = offset(source_ptr, source.len() + 1)?;

        guest.write(result_slot, &[0; RESULT_SLOT_LEN])?;
        guest.write_c_str(source_ptr, source)?;
        guest.write_c_str(options_ptr, options)?;

        tracing::debug!(size, base, "calling native formatter");
        let status = guest.call_format(source_ptr, options_ptr, result_slot)?;

        let result_ptr = guest.read_u32(result_slot)?;
        let text = if result_ptr == 0 {
            String::new()
        } else {
            guest.track(result_ptr);
            guest.read_c_str(result_ptr)?
        };

        if status == 0 {
            if text.is_empty() {
                return Err(NativeError::Format("formatter reported an error".to_string()));
            }
            return Err(NativeError::Format(text));
        }
        Ok(text)
    }

    fn instantiate<'a>(&self, ledger: &'a mut AllocationLedger) -> Result<Guest<'a>, NativeError> {
        let instantiation = |e: wasmtime::Error| NativeError::Instantiation(format!("{e:#}"));

        let mut linker = wasmtime::Linker::<WasiP1Ctx>::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |cx| cx).map_err(instantiation)?;

        let wasi = WasiCtxBuilder::new().inherit_stdio().build_p1();
        let mut store = Store::new(&self.engine, wasi);
        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(instantiation)?;

        if let Some(init) = instance.get_func(&mut store, "_initialize") {
            init.typed::<(), ()>(&store)
                .map_err(instantiation)?
                .call(&mut store, ())
                .map_err(|e| NativeError::Trap(format!("{e:#}")))?;
        }

        let memory = instance
            .get_memory(&mut store, &self.exports.memory)
            .ok_or_else(|| {
                NativeError::Instantiation(format!("missing export `{}`", self.exports.memory))
            })?;
        let alloc_fn = typed_export::<u32, u32>(&instance, &mut store, &self.exports.alloc)?;
        let free_fn = typed_export::<u32, ()>(&instance, &mut store, &self.exports.free)?;
        let format_fn =
            typed_export::<(u32, u32, u32), i32>(&instance, &mut store, &self.exports.format)?;

        Ok(Guest {
            store,
            memory,
            alloc_fn,
            free_fn,
            format_fn,
            live: Vec::new(),
            ledger,
        })
    }
}

fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<WasiP1Ctx>,
    name: &str,
) -> Result<TypedFunc<P, R>, NativeError>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| NativeError::Instantiation(format!("export `{name}`: {e:#}")))
}

fn offset(base: u32, by: usize) -> Result<u32, NativeError> {
    u32::try_from(by)
        .ok()
        .and_then(|by| base.checked_add(by))
        .ok_or(NativeError::OutOfBounds {
            offset: base as usize,
            len: by,
        })
}

/// One instantiated module. Dropping it frees every live allocation.
struct Guest<'a> {
    store: Store<WasiP1Ctx>,
    memory: Memory,
    alloc_fn: TypedFunc<u32, u32>,
    free_fn: TypedFunc<u32, ()>,
    format_fn: TypedFunc<(u32, u32, u32), i32>,
    live: Vec<u32>,
    ledger: &'a mut AllocationLedger,
}

impl Guest<'_> {
    fn alloc(&mut self, size: usize) -> Result<u32, NativeError> {
        let request = u32::try_from(size).map_err(|_| NativeError::Allocation { size })?;
        let ptr = self
            .alloc_fn
            .call(&mut self.store, request)
            .map_err(|e| NativeError::Trap(format!("{e:#}")))?;
        if ptr == 0 {
            return Err(NativeError::Allocation { size });
        }
        self.track(ptr);
        Ok(ptr)
    }

    fn track(&mut self, ptr: u32) {
        self.live.push(ptr);
        self.ledger.allocated.push(ptr);
    }

    fn call_format(&mut self, source: u32, options: u32, slot: u32) -> Result<i32, NativeError> {
        self.format_fn
            .call(&mut self.store, (source, options, slot))
            .map_err(|e| NativeError::Trap(format!("{e:#}")))
    }

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), NativeError> {
        self.memory
            .write(&mut self.store, ptr as usize, bytes)
            .map_err(|_| NativeError::OutOfBounds {
                offset: ptr as usize,
                len: bytes.len(),
            })
    }

    fn write_c_str(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), NativeError> {
        self.write(ptr, bytes)?;
        let nul = offset(ptr, bytes.len())?;
        self.write(nul, &[0])
    }

    fn read_u32(&self, ptr: u32) -> Result<u32, NativeError> {
        let mut bytes = [0u8; 4];
        self.memory
            .read(&self.store, ptr as usize, &mut bytes)
            .map_err(|_| NativeError::ResultRead(format!("result slot {ptr} out of bounds")))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_c_str(&self, ptr: u32) -> Result<String, NativeError> {
        let data = self.memory.data(&self.store);
        let start = ptr as usize;
        let tail = data
            .get(start..)
            .ok_or_else(|| NativeError::ResultRead(format!("result pointer {ptr} out of bounds")))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| NativeError::ResultRead("result is not NUL-terminated".to_string()))?;
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }
}

impl Drop for Guest<'_> {
    fn drop(&mut self) {
        for ptr in std::mem::take(&mut self.live) {
            match self.free_fn.call(&mut self.store, ptr) {
                Ok(()) => self.ledger.freed.push(ptr),
                Err(e) => tracing::warn!(ptr, error = %e, "failed to free guest allocation"),
            }
        }
    }
}

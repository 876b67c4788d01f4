use std::os::raw::c_int;
use std::path::{Path, PathBuf};

use libloading::Library;
use session::ErrorKind;
use thiserror::Error;

/// Name of the entry point every benchmark module exports
pub const ENTRY_POINT: &str = "run_iter";

/// Something that can run one benchmark iteration
pub trait Benchmark {
    fn run_iter(&mut self, param: i32);
}

impl<F: FnMut(i32)> Benchmark for F {
    fn run_iter(&mut self, param: i32) {
        self(param)
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to load benchmark module {}: {source}", .path.display())]
    Library {
        path: PathBuf,
        source: libloading::Error,
    },
    #[error("benchmark module {} has no `run_iter` symbol: {source}", .path.display())]
    Symbol {
        path: PathBuf,
        source: libloading::Error,
    },
}

impl LoadError {
    /// A module or entry point that cannot be resolved is a missing resource
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ResourceUnavailable
    }
}

type EntryPoint = unsafe extern "C" fn(c_int);

/// A benchmark module loaded from a shared library.
///
/// The library stays loaded for as long as this value lives and is unloaded
/// on drop.
pub struct DynamicBenchmark {
    entry: EntryPoint,
    _library: Library,
}

impl DynamicBenchmark {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        // SAFETY: loading runs the module's initialisers. Benchmark modules
        // are trusted code supplied by whoever runs the harness.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Library {
            path: path.to_path_buf(),
            source,
        })?;
        let entry = resolve_entry(&library).map_err(|source| LoadError::Symbol {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            entry,
            _library: library,
        })
    }
}

/// Look up the entry point and cast it to its C signature.
///
/// The returned pointer is only valid while `library` stays loaded;
/// [`DynamicBenchmark`] keeps the two together.
fn resolve_entry(library: &Library) -> Result<EntryPoint, libloading::Error> {
    // SAFETY: the module contract fixes the symbol's type as
    // `void run_iter(int)`. A module exporting something else under this
    // name is not a benchmark module.
    let symbol = unsafe { library.get::<EntryPoint>(ENTRY_POINT.as_bytes())? };
    Ok(*symbol)
}

impl Benchmark for DynamicBenchmark {
    fn run_iter(&mut self, param: i32) {
        // SAFETY: see `resolve_entry`; the library outlives `self.entry`.
        unsafe { (self.entry)(param) }
    }
}

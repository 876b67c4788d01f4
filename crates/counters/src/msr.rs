//! Counter source backed by the per-core MSR device nodes.
//!
//! Each core's node is opened read-write once and accessed with positioned
//! reads and writes, where the file offset is the register address.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};

use log::debug;

use crate::{check_core, cores, cpuid, CounterSource, Error};

/// Fixed-function counter control register
const IA32_FIXED_CTR_CTRL: u64 = 0x38d;
/// Fixed-function counter 1, CPU_CLK_UNHALTED.CORE
const IA32_PERF_FIXED_CTR1: u64 = 0x30a;
const IA32_MPERF: u64 = 0xe7;
const IA32_APERF: u64 = 0xe8;

// IA32_FIXED_CTR_CTRL bits for fixed counter 1
const EN1_OS: u64 = 1 << 4;
const EN1_USR: u64 = 1 << 5;
const EN1_ANYTHR: u64 = 1 << 6;

/// 64-bit register access by MSR address
pub trait Registers {
    fn read_reg(&self, addr: u64) -> io::Result<u64>;
    fn write_reg(&self, addr: u64, value: u64) -> io::Result<()>;
    fn release(self) -> nix::Result<()>;
}

impl Registers for File {
    fn read_reg(&self, addr: u64) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(&mut buf, addr)?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn write_reg(&self, addr: u64, value: u64) -> io::Result<()> {
        self.write_all_at(&value.to_ne_bytes(), addr)
    }

    fn release(self) -> nix::Result<()> {
        nix::unistd::close(self.into_raw_fd())
    }
}

/// One open MSR device node
#[derive(Debug)]
struct MsrNode<R> {
    core: usize,
    regs: R,
}

impl MsrNode<File> {
    fn open(core: usize, path: &Path) -> Result<Self, Error> {
        let regs = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Open {
                core,
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { core, regs })
    }
}

impl<R: Registers> MsrNode<R> {
    fn read(&self, addr: u64, what: &'static str) -> Result<u64, Error> {
        self.regs.read_reg(addr).map_err(|source| Error::Read {
            core: self.core,
            what,
            source,
        })
    }

    fn write(&self, addr: u64, value: u64, what: &'static str) -> Result<(), Error> {
        self.regs
            .write_reg(addr, value)
            .map_err(|source| Error::Write {
                core: self.core,
                what,
                source,
            })
    }

    fn close(self) -> Result<(), Error> {
        let core = self.core;
        self.regs
            .release()
            .map_err(|source| Error::Close { core, source })
    }

    /// Count unhalted cycles in all rings and for all hardware threads
    fn enable_fixed_ctr1(&self) -> Result<(), Error> {
        let ctrl = self.read(IA32_FIXED_CTR_CTRL, "IA32_FIXED_CTR_CTRL")?;
        self.write(
            IA32_FIXED_CTR_CTRL,
            ctrl | EN1_OS | EN1_USR | EN1_ANYTHR,
            "IA32_FIXED_CTR_CTRL",
        )
    }
}

/// Path of the MSR device node `node_name` for `core`
pub fn node_path(core: usize, node_name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/cpu/{}/{}", core, node_name))
}

/// Reads core cycles, APERF and MPERF from `/dev/cpu/<core>/<node>`
#[derive(Debug)]
pub struct MsrSource<R: Registers = File> {
    nodes: Vec<MsrNode<R>>,
    cycles_mask: u64,
}

impl MsrSource<File> {
    /// Probe the cycle counter width and open the device node of every
    /// online core.
    pub fn open(node_name: &str) -> Result<Self, Error> {
        let width = cpuid::fixed_counter_width()?;
        let count = cores::discover_cores()?;
        let paths: Vec<PathBuf> = (0..count).map(|core| node_path(core, node_name)).collect();
        Self::open_paths(&paths, cpuid::width_mask(width))
    }

    fn open_paths(paths: &[PathBuf], cycles_mask: u64) -> Result<Self, Error> {
        let nodes = paths
            .iter()
            .enumerate()
            .map(|(core, path)| MsrNode::open(core, path))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "opened {} MSR nodes, cycle counter mask {:#x}",
            nodes.len(),
            cycles_mask
        );
        Ok(Self { nodes, cycles_mask })
    }
}

impl<R: Registers> MsrSource<R> {
    #[cfg(test)]
    fn with_registers(regs: Vec<R>, cycles_mask: u64) -> Self {
        let nodes = regs
            .into_iter()
            .enumerate()
            .map(|(core, regs)| MsrNode { core, regs })
            .collect();
        Self { nodes, cycles_mask }
    }

    fn node(&self, core: usize) -> Result<&MsrNode<R>, Error> {
        check_core(core, self.nodes.len())?;
        Ok(&self.nodes[core])
    }
}

impl<R: Registers> CounterSource for MsrSource<R> {
    fn core_count(&self) -> usize {
        self.nodes.len()
    }

    fn reset(&mut self) -> Result<(), Error> {
        for node in &self.nodes {
            node.enable_fixed_ctr1()?;
            node.write(IA32_PERF_FIXED_CTR1, 0, "IA32_PERF_FIXED_CTR1")?;
        }
        for node in &self.nodes {
            node.write(IA32_MPERF, 0, "IA32_MPERF")?;
            node.write(IA32_APERF, 0, "IA32_APERF")?;
        }
        Ok(())
    }

    fn read_cycles(&mut self, core: usize) -> Result<u64, Error> {
        let value = self
            .node(core)?
            .read(IA32_PERF_FIXED_CTR1, "IA32_PERF_FIXED_CTR1")?;
        Ok(value & self.cycles_mask)
    }

    fn read_aperf(&mut self, core: usize) -> Result<u64, Error> {
        let node = self.node(core)?;
        // The first APERF read after a power state change can return a stale
        // value (processor erratum), so one read is thrown away.
        node.read(IA32_APERF, "IA32_APERF")?;
        node.read(IA32_APERF, "IA32_APERF")
    }

    fn read_mperf(&mut self, core: usize) -> Result<u64, Error> {
        self.node(core)?.read(IA32_MPERF, "IA32_MPERF")
    }

    fn close(&mut self) -> Result<(), Error> {
        let mut first_err = None;
        for node in self.nodes.drain(..) {
            if let Err(e) = node.close() {
                first_err.get_or_insert(e);
            }
        }
        debug!("closed MSR nodes");
        first_err.map_or(Ok(()), Err)
    }
}

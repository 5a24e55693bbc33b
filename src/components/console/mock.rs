//! Mock console — records output into a fixed ring buffer.
//!
//! Stands in for a real UART driver (out of scope, see module doc on
//! `components::console`) under `feature = "console-mock"`, which is the
//! default so the crate's own test/host builds and `tests/` suites have
//! somewhere to send `kprintln!` output without depending on hardware.

use super::Console;
use spin::Mutex;

const BUF_LEN: usize = 4096;

struct Ring {
    buf: [u8; BUF_LEN],
    len: usize,
}

impl Ring {
    const fn new() -> Self {
        Self { buf: [0; BUF_LEN], len: 0 }
    }

    fn push(&mut self, c: u8) {
        if self.len < BUF_LEN {
            self.buf[self.len] = c;
            self.len += 1;
        }
    }
}

#[derive(Clone, Copy)]
pub struct MockConfig;

pub struct MockConsole {
    ring: Mutex<Ring>,
}

impl MockConsole {
    pub const fn new(_config: MockConfig) -> Self {
        Self { ring: Mutex::new(Ring::new()) }
    }

    pub fn init(&self) {}

    /// Number of bytes written so far. Used by boot-sequence and syscall
    /// tests to assert on what the kernel printed.
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    /// Copy recorded output into `out`, returning how many bytes were copied.
    pub fn copy_into(&self, out: &mut [u8]) -> usize {
        let ring = self.ring.lock();
        let n = core::cmp::min(ring.len, out.len());
        out[..n].copy_from_slice(&ring.buf[..n]);
        n
    }
}

impl Console for MockConsole {
    fn putc(&self, c: u8) {
        self.ring.lock().push(c);
    }
}

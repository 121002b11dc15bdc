use crate::error::{ErrorCode, Result};

/// Byte-level access to the debuggee address space.
///
/// The ptrace backend provides the production implementation; the
/// breakpoint managers and the single-step planner only depend on this
/// trait so their logic can be exercised against an in-memory image.
pub trait TraceeMemory {
    /// Read up to `buf.len()` bytes at `address`, returning the count
    /// actually transferred.
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `data` at `address`, returning the count actually
    /// transferred.
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize>;

    fn read_exact(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        if self.read_memory(address, buf)? != buf.len() {
            return Err(ErrorCode::InvalidAddress);
        }
        Ok(())
    }

    fn read_u8(&self, address: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(address, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, address: u64) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(address, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::BTreeMap;

    /// Sparse byte image standing in for a tracee address space.
    #[derive(Default)]
    pub struct FakeMemory {
        bytes: BTreeMap<u64, u8>,
    }

    impl FakeMemory {
        pub fn new() -> FakeMemory {
            FakeMemory::default()
        }

        pub fn load(&mut self, address: u64, data: &[u8]) {
            for (i, b) in data.iter().enumerate() {
                self.bytes.insert(address + i as u64, *b);
            }
        }

        pub fn load_u32(&mut self, address: u64, value: u32) {
            self.load(address, &value.to_le_bytes());
        }

        pub fn byte(&self, address: u64) -> Option<u8> {
            self.bytes.get(&address).copied()
        }
    }

    impl TraceeMemory for FakeMemory {
        fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
            for (i, slot) in buf.iter_mut().enumerate() {
                match self.bytes.get(&(address + i as u64)) {
                    Some(b) => *slot = *b,
                    None => return Err(ErrorCode::InvalidAddress),
                }
            }
            Ok(buf.len())
        }

        fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize> {
            for (i, b) in data.iter().enumerate() {
                match self.bytes.get_mut(&(address + i as u64)) {
                    Some(slot) => *slot = *b,
                    None => return Err(ErrorCode::InvalidAddress),
                }
            }
            Ok(data.len())
        }
    }
}

//! Checksum Engine: recomputes the PE checksum word, optionally via a native
//! accelerator resolved once and cached.
//!
//! A native `checksum32.dll`/`checksum64.dll` sitting next to the running
//! executable may replace the pure-Rust loop below; absent it, the fallback
//! always runs. Resolution happens once per process via `OnceLock`, mirroring
//! the original's `USE_CHECKSUM_DLL` one-shot global.

use std::sync::OnceLock;

use libloading::{Library, Symbol};

use crate::pe::header::OFF_CHECKSUM;
use crate::util::read_u32;

type UpdChecksumFn = unsafe extern "C" fn(*mut u8, u32);

struct NativeChecksum {
    _lib: Library,
    func: UpdChecksumFn,
}

static NATIVE: OnceLock<Option<NativeChecksum>> = OnceLock::new();

fn native_dll_name() -> &'static str {
    if cfg!(target_pointer_width = "64") {
        "checksum64.dll"
    } else {
        "checksum32.dll"
    }
}

fn load_native() -> Option<NativeChecksum> {
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    let dll_path = exe_dir.join(native_dll_name());
    if !dll_path.exists() {
        return None;
    }
    unsafe {
        let lib = Library::new(&dll_path).ok()?;
        let func: Symbol<UpdChecksumFn> = lib.get(b"UpdChecksum").ok()?;
        let func = *func;
        Some(NativeChecksum { _lib: lib, func })
    }
}

/// Pure-Rust fallback: 32-bit word sum with carry folding, mirrors
/// `update_checksum_py`.
pub fn checksum_pure(data: &[u8]) -> u32 {
    let e_lfanew = read_u32(data, 0x3c).unwrap_or(0) as usize;
    let checksum_offset = e_lfanew + OFF_CHECKSUM;

    let mut sum: u64 = 0;
    let mut i = 0usize;
    while i < data.len() {
        if i == checksum_offset {
            i += 4;
            continue;
        }
        let word = if i + 4 <= data.len() {
            u32::from_le_bytes(data[i..i + 4].try_into().unwrap())
        } else {
            let mut buf = [0u8; 4];
            buf[..data.len() - i].copy_from_slice(&data[i..]);
            u32::from_le_bytes(buf)
        };
        sum += word as u64;
        if sum >= 1 << 32 {
            sum = (sum & 0xffff_ffff) + (sum >> 32);
        }
        i += 4;
    }
    let mut sum = sum as u32;
    sum = (sum & 0xffff) + (sum >> 16);
    sum += sum >> 16;
    sum &= 0xffff;
    sum + data.len() as u32
}

/// Rewrites the checksum field in place, preferring the native accelerator
/// when present. Mirrors `update_checksum`.
pub fn update_checksum(data: &mut [u8]) {
    let e_lfanew = read_u32(data, 0x3c).unwrap_or(0) as usize;
    let checksum_offset = e_lfanew + OFF_CHECKSUM;

    let native = NATIVE.get_or_init(load_native);
    if let Some(native) = native {
        unsafe { (native.func)(data.as_mut_ptr(), data.len() as u32) };
        return;
    }
    let checksum = checksum_pure(data);
    data[checksum_offset..checksum_offset + 4].copy_from_slice(&checksum.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_when_already_correct() {
        let mut data = vec![0u8; 0x200];
        data[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
        let checksum_offset = 0x80 + OFF_CHECKSUM;
        let initial = checksum_pure(&data);
        data[checksum_offset..checksum_offset + 4].copy_from_slice(&initial.to_le_bytes());
        let recomputed = checksum_pure(&data);
        assert_eq!(initial, recomputed);
    }
}

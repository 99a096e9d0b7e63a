//! Device information record exchanged on ENTER_BOOT.
//!
//! Layout, integers little-endian:
//!
//! ```text
//! [model_len:1][model][flash_size:4][app_address:4][packet_size:4][version_len:1][version]
//! ```

use core::fmt;

/// Device identity and flash layout reported by the bootloader
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo<'a> {
    pub model: &'a str,
    pub flash_size: u32,
    pub app_address: u32,
    pub packet_size: u32,
    pub version: &'a str,
}

impl<'a> DeviceInfo<'a> {
    /// Encoded length of this record
    pub fn encoded_len(&self) -> usize {
        1 + self.model.len() + 12 + 1 + self.version.len()
    }

    /// Serialise into `out`, returning the number of bytes written or `None`
    /// if the buffer is too small or a string exceeds 255 bytes.
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        if out.len() < self.encoded_len() || self.model.len() > 255 || self.version.len() > 255 {
            return None;
        }

        let mut index = 0;
        index += put_str(&mut out[index..], self.model);
        for v in [self.flash_size, self.app_address, self.packet_size].iter() {
            out[index..index + 4].copy_from_slice(&v.to_le_bytes());
            index += 4;
        }
        index += put_str(&mut out[index..], self.version);

        Some(index)
    }

    /// Parse a record, borrowing the strings from `bytes`
    pub fn decode(bytes: &'a [u8]) -> Option<Self> {
        let (model, rest) = take_str(bytes)?;
        if rest.len() < 12 {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([rest[i], rest[i + 1], rest[i + 2], rest[i + 3]]);
        let (flash_size, app_address, packet_size) = (word(0), word(4), word(8));
        let (version, _) = take_str(&rest[12..])?;

        Some(DeviceInfo {
            model,
            flash_size,
            app_address,
            packet_size,
            version,
        })
    }
}

impl<'a> fmt::Display for DeviceInfo<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} (bootloader {}), flash: {} bytes, application: 0x{:08x}, packet: {} bytes",
            self.model, self.version, self.flash_size, self.app_address, self.packet_size
        )
    }
}

fn put_str(out: &mut [u8], s: &str) -> usize {
    out[0] = s.len() as u8;
    out[1..1 + s.len()].copy_from_slice(s.as_bytes());
    1 + s.len()
}

fn take_str(bytes: &[u8]) -> Option<(&str, &[u8])> {
    let (&len, rest) = bytes.split_first()?;
    let len = len as usize;
    if rest.len() < len {
        return None;
    }
    let s = core::str::from_utf8(&rest[..len]).ok()?;
    Some((s, &rest[len..]))
}

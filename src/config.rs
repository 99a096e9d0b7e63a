//! Device layout and timing constants.

use thiserror::Error;

use crate::firmware::CHUNK_HEADER_LEN;
use crate::info::DeviceInfo;
use crate::protocol::MAX_DATA;

/// Build-time description of the target device.
///
/// Nothing here is stored on the device, a bootloader image is built against
/// one `BootConfig` (usually [`BootConfig::STM32H750`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootConfig {
    /// Device model reported to the host
    pub model: &'static str,
    /// Bootloader version reported to the host
    pub version: &'static str,

    /// Load address of the application image (its vector table)
    pub app_address: u32,
    /// Last valid flash address, inclusive
    pub flash_end: u32,
    /// Total flash size in bytes
    pub flash_size: u32,

    /// Firmware bytes carried by one UPLOAD packet
    pub packet_size: u32,
    /// Flash program granularity in bytes, a power of two
    pub program_unit: u32,

    /// Time to wait for the maintenance key before starting the application
    pub boot_wait_ms: u32,
    /// Status LED half period while in maintenance mode
    pub blink_period_ms: u32,

    /// Lowest valid initial stack pointer, inclusive
    pub ram_start: u32,
    /// Highest valid initial stack pointer, inclusive
    pub ram_end: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("program unit {0} is not a power of two")]
    ProgramUnit(u32),

    #[error("packet size {0} is not a multiple of the program unit")]
    PacketSize(u32),

    #[error("packet size {0} does not fit in a frame")]
    PacketTooLarge(u32),

    #[error("application address 0x{0:08x} is outside flash")]
    AppAddress(u32),

    #[error("RAM window is empty")]
    RamWindow,
}

impl BootConfig {
    /// Reference board, STM32H750 with the application at 64 KiB
    pub const STM32H750: BootConfig = BootConfig {
        model: "STM32H750",
        version: "v0.0.1",
        app_address: 0x0801_0000,
        flash_end: 0x080F_FFFF,
        flash_size: 0x0010_0000,
        packet_size: 512,
        program_unit: 32,
        boot_wait_ms: 2000,
        blink_period_ms: 500,
        ram_start: 0x2000_0000,
        ram_end: 0x2002_0000,
    };

    /// Check the layout is self-consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.program_unit.is_power_of_two() {
            return Err(ConfigError::ProgramUnit(self.program_unit));
        }

        if self.packet_size == 0 || self.packet_size % self.program_unit != 0 {
            return Err(ConfigError::PacketSize(self.packet_size));
        }

        if CHUNK_HEADER_LEN + self.packet_size as usize >= MAX_DATA {
            return Err(ConfigError::PacketTooLarge(self.packet_size));
        }

        if self.app_address > self.flash_end || self.app_address % self.program_unit != 0 {
            return Err(ConfigError::AppAddress(self.app_address));
        }

        if self.ram_start > self.ram_end {
            return Err(ConfigError::RamWindow);
        }

        Ok(())
    }

    /// Identity record sent in reply to ENTER_BOOT
    pub fn device_info(&self) -> DeviceInfo<'static> {
        DeviceInfo {
            model: self.model,
            flash_size: self.flash_size,
            app_address: self.app_address,
            packet_size: self.packet_size,
            version: self.version,
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::STM32H750
    }
}

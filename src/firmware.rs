//! Firmware image source and installer
//!
//! On a distributing node the source holds the image obtained from the
//! network. On a receiving node `install_image` validates and commits a
//! reassembled image; the restart that follows is outside the protocol.

use core::fmt;
use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Semantic firmware version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    /// Version of the firmware running on this node
    pub const fn running() -> Self {
        use crate::config::protocol::{VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH};
        Self::new(VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The installer refused an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    Rejected,
}

/// Firmware image collaborator
pub trait FirmwareSource {
    /// True while a newly obtained image has not been announced yet
    fn has_new_image(&self) -> bool;

    /// Clear the new-image flag once the announcement starts
    fn acknowledge_new_image(&mut self);

    /// The stored image, if any
    fn image(&self) -> Option<&[u8]>;

    /// Version of the stored image
    fn version(&self) -> FirmwareVersion;

    /// Validate and commit a reassembled image
    fn install_image(&mut self, image: &[u8]) -> Result<(), InstallError>;
}

/// CRC-32 (ISO-HDLC) of a firmware image, as carried in `OTA_END`
pub fn image_checksum(image: &[u8]) -> u32 {
    CRC32.checksum(image)
}

#[cfg(test)]
pub mod mock {
    //! In-memory firmware source for testing

    use super::*;

    #[derive(Default)]
    pub struct MockFirmware {
        image: Option<std::vec::Vec<u8>>,
        new_image: bool,
        version: Option<FirmwareVersion>,
        /// Images handed to install_image()
        pub installed: std::vec::Vec<std::vec::Vec<u8>>,
        /// Reject every install when set
        pub reject_installs: bool,
    }

    impl MockFirmware {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store an image and raise the new-image flag
        pub fn provide(&mut self, image: &[u8], version: FirmwareVersion) {
            self.image = Some(image.to_vec());
            self.version = Some(version);
            self.new_image = true;
        }
    }

    impl FirmwareSource for MockFirmware {
        fn has_new_image(&self) -> bool {
            self.new_image
        }

        fn acknowledge_new_image(&mut self) {
            self.new_image = false;
        }

        fn image(&self) -> Option<&[u8]> {
            self.image.as_deref()
        }

        fn version(&self) -> FirmwareVersion {
            self.version.unwrap_or(FirmwareVersion::running())
        }

        fn install_image(&mut self, image: &[u8]) -> Result<(), InstallError> {
            if self.reject_installs {
                return Err(InstallError::Rejected);
            }
            self.installed.push(image.to_vec());
            Ok(())
        }
    }
}

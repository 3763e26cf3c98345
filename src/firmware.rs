use crate::error::OtaError;
use std::path::Path;

/// Raw application image, sent as-is
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
}

/// Size rule for an image whose length must fit the 4 byte size field
pub fn check_size(size: usize) -> Result<u32, OtaError> {
    match u32::try_from(size) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(OtaError::InvalidImage { size }),
    }
}

impl FirmwareImage {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OtaError> {
        let bytes = std::fs::read(path.as_ref())?;
        tracing::debug!("Read {} bytes from {}", bytes.len(), path.as_ref().display());
        Ok(Self::from_bytes(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        FirmwareImage { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn validate(&self) -> Result<(), OtaError> {
        check_size(self.len()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xE9, 0x03, 0x02, 0x20]).unwrap();
        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert_eq!(image.as_bytes(), &[0xE9, 0x03, 0x02, 0x20]);
        assert!(image.validate().is_ok());
    }

    #[test]
    fn missing_file_is_firmware_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FirmwareImage::from_file(dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, OtaError::Firmware(_)));
    }

    #[test]
    fn empty_file_is_invalid() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert!(matches!(image.validate(), Err(OtaError::InvalidImage { size: 0 })));
    }

    #[test]
    fn size_must_fit_u32() {
        assert_eq!(check_size(1).unwrap(), 1);
        assert_eq!(check_size(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(check_size(u32::MAX as usize + 1).is_err());
    }
}

//! Firmware image resolution.
//!
//! Image filenames come from a two-tier static table: a base image per
//! machine id, and a heated-bed override used when the machine id also
//! appears in the heated-bed table *and* the active profile has the
//! heated-bed option enabled. `{baudrate}` in a filename is substituted
//! with the platform default rate before the name is handed to a
//! [crate::FirmwareStore].

use std::path::PathBuf;

use crate::{error::FirmwareError, traits::FirmwareStore};

/// Resource category firmware images live under in a [FirmwareStore].
pub const FIRMWARE_CATEGORY: &str = "firmware";

/// Baud rate embedded in firmware image names, by host platform.
fn image_baud_rate() -> u32 {
    if cfg!(target_os = "linux") {
        115_200
    } else {
        250_000
    }
}

// The keyword is the id of the machine definition. The hex files
// themselves ship separately with the application's resources.
fn base_image(machine_id: &str) -> Option<&'static str> {
    match machine_id {
        "bq_witbox" => Some("MarlinWitbox.hex"),
        "bq_hephestos_2" => Some("MarlinHephestos2.hex"),
        "ultimaker_original" => Some("MarlinUltimaker-{baudrate}.hex"),
        "ultimaker_original_plus" => Some("MarlinUltimaker-UMOP-{baudrate}.hex"),
        "ultimaker2" => Some("MarlinUltimaker2.hex"),
        "ultimaker2_go" => Some("MarlinUltimaker2go.hex"),
        "ultimaker2plus" => Some("MarlinUltimaker2plus.hex"),
        "ultimaker2_extended" => Some("MarlinUltimaker2extended.hex"),
        "ultimaker2_extended_plus" => Some("MarlinUltimaker2extended-plus.hex"),
        _ => None,
    }
}

fn heated_bed_image(machine_id: &str) -> Option<&'static str> {
    match machine_id {
        "ultimaker_original" => Some("MarlinUltimaker-HBK-{baudrate}.hex"),
        _ => None,
    }
}

/// Resolve the firmware image filename for a machine.
///
/// A machine id with no base table entry is a [FirmwareError::MissingImage];
/// for a firmware batch that is fatal for the whole batch, since there is
/// no image to flash anyone with.
pub fn resolve_image(machine_id: &str, heated_bed_enabled: bool) -> Result<String, FirmwareError> {
    let template = match (base_image(machine_id), heated_bed_image(machine_id)) {
        (Some(_), Some(heated)) if heated_bed_enabled => {
            tracing::debug!(machine = machine_id, "choosing firmware with heated bed enabled");
            heated
        }
        (Some(base), _) => {
            tracing::debug!(machine = machine_id, "choosing basic firmware");
            base
        }
        (None, _) => {
            tracing::error!(machine = machine_id, "there is no firmware for this machine");
            return Err(FirmwareError::MissingImage(machine_id.to_string()));
        }
    };

    Ok(template.replace("{baudrate}", &image_baud_rate().to_string()))
}

/// Firmware store rooted at a directory: images live at
/// `<root>/<category>/<filename>`.
#[derive(Debug, Clone)]
pub struct DirFirmwareStore {
    root: PathBuf,
}

impl DirFirmwareStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FirmwareStore for DirFirmwareStore {
    fn resolve(&self, category: &str, filename: &str) -> Result<PathBuf, FirmwareError> {
        let path = self.root.join(category).join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(FirmwareError::FlashFailure {
                path,
                reason: "image not present".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn platform_baud() -> &'static str {
        if cfg!(target_os = "linux") {
            "115200"
        } else {
            "250000"
        }
    }

    #[test]
    fn test_heated_bed_variant_selected_when_enabled() {
        let image = resolve_image("ultimaker_original", true).unwrap();
        assert_eq!(image, format!("MarlinUltimaker-HBK-{}.hex", platform_baud()));
    }

    #[test]
    fn test_base_variant_selected_when_heated_bed_disabled() {
        let image = resolve_image("ultimaker_original", false).unwrap();
        assert_eq!(image, format!("MarlinUltimaker-{}.hex", platform_baud()));
    }

    #[test]
    fn test_heated_bed_flag_ignored_without_override_entry() {
        let image = resolve_image("ultimaker2", true).unwrap();
        assert_eq!(image, "MarlinUltimaker2.hex");
    }

    #[test]
    fn test_unknown_machine_is_missing_image() {
        let err = resolve_image("frankenprinter", false).unwrap_err();
        assert!(matches!(err, FirmwareError::MissingImage(id) if id == "frankenprinter"));
    }

    #[test]
    fn test_dir_store_resolves_existing_file() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(FIRMWARE_CATEGORY);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("MarlinUltimaker2.hex"), b":00000001FF\n").unwrap();

        let store = DirFirmwareStore::new(root.path());
        let path = store.resolve(FIRMWARE_CATEGORY, "MarlinUltimaker2.hex").unwrap();
        assert!(path.ends_with("firmware/MarlinUltimaker2.hex"));
    }

    #[test]
    fn test_dir_store_missing_file_is_flash_failure() {
        let root = tempfile::tempdir().unwrap();
        let store = DirFirmwareStore::new(root.path());
        let err = store.resolve(FIRMWARE_CATEGORY, "MarlinWitbox.hex").unwrap_err();
        assert!(matches!(err, FirmwareError::FlashFailure { .. }));
    }
}

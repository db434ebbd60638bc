//! Vulkan validation layer debug messenger.
//!
//! Messages are filtered through the configured deny-list, logged at the
//! matching level, and, for severities in `break_on`, treated as a break:
//! logged as such and, with `abort_on_break`, the process is aborted.

use std::ffi::{CStr, c_void};

use ash::vk;

use crate::config::{ValidationConfig, ValidationSeverity};
use crate::error::GraphicsError;

/// Installed debug messenger and the settings its callback reads.
pub(crate) struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // Read by the callback through the user-data pointer.
    _config: Box<ValidationConfig>,
}

impl DebugMessenger {
    pub(crate) fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        config: ValidationConfig,
    ) -> Result<Self, GraphicsError> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let config = Box::new(config);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(&*config as *const ValidationConfig as *mut c_void);

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "failed to create debug messenger: {e:?}"
                ))
            })?;

        Ok(Self {
            loader,
            messenger,
            _config: config,
        })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

/// Severity class of a Vulkan message.
fn classify(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> ValidationSeverity {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        ValidationSeverity::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        ValidationSeverity::WARNING
    } else {
        ValidationSeverity::INFO
    }
}

/// What the callback does with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Drop,
    Log,
    Break,
}

impl Disposition {
    /// Value handed back to the driver. `TRUE` fails the offending call
    /// with `VK_ERROR_VALIDATION_FAILED_EXT`.
    fn callback_result(self) -> vk::Bool32 {
        match self {
            Self::Drop | Self::Log => vk::FALSE,
            Self::Break => vk::TRUE,
        }
    }
}

fn disposition(
    config: &ValidationConfig,
    message_id: i32,
    severity: ValidationSeverity,
) -> Disposition {
    if config.is_denied(message_id) {
        Disposition::Drop
    } else if config.break_on.intersects(severity) {
        Disposition::Break
    } else {
        Disposition::Log
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the driver passes valid callback data, and user_data points at
    // the boxed config owned by the messenger for its whole lifetime.
    let (data, config) = unsafe { (&*callback_data, &*(user_data as *const ValidationConfig)) };

    let message = if data.p_message.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: p_message is a NUL-terminated string owned by the driver.
        unsafe { CStr::from_ptr(data.p_message) }
            .to_string_lossy()
            .into_owned()
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    let severity = classify(message_severity);
    let disposition = disposition(config, data.message_id_number, severity);
    match disposition {
        Disposition::Drop => {}
        Disposition::Log => {
            if severity == ValidationSeverity::ERROR {
                log::error!("[Vulkan {type_str}] {message}");
            } else if severity == ValidationSeverity::WARNING {
                log::warn!("[Vulkan {type_str}] {message}");
            } else {
                log::debug!("[Vulkan {type_str}] {message}");
            }
        }
        Disposition::Break => {
            log::error!("[Vulkan {type_str}] break on {severity:?}: {message}");
            if config.abort_on_break {
                std::process::abort();
            }
        }
    }

    disposition.callback_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            ValidationSeverity::ERROR
        );
        assert_eq!(
            classify(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            ValidationSeverity::INFO
        );
    }

    #[test]
    fn test_deny_list_wins_over_break() {
        let config = ValidationConfig::default()
            .with_break_on(ValidationSeverity::ERROR)
            .with_denied_message(42);
        assert_eq!(
            disposition(&config, 42, ValidationSeverity::ERROR),
            Disposition::Drop
        );
        assert_eq!(
            disposition(&config, 7, ValidationSeverity::ERROR),
            Disposition::Break
        );
        assert_eq!(
            disposition(&config, 7, ValidationSeverity::WARNING),
            Disposition::Log
        );
    }

    #[test]
    fn test_break_fails_the_offending_call() {
        let config = ValidationConfig::default().with_break_on(ValidationSeverity::ERROR);

        let broken = disposition(&config, 7, ValidationSeverity::ERROR);
        assert_eq!(broken.callback_result(), vk::TRUE);
        assert_eq!(
            disposition(&config, 7, ValidationSeverity::WARNING).callback_result(),
            vk::FALSE
        );
        assert_eq!(Disposition::Drop.callback_result(), vk::FALSE);
    }
}

//! Plug-ins that bring their own settings and callbacks.

use doozer_config::Settings;

use crate::{app::Application, error::Result};

/// A reusable bundle of settings defaults and callbacks.
///
/// [`Application::init_extension`] applies [`default_settings`] without
/// overriding anything already set, checks [`required_settings`], and then
/// calls [`init_app`] so the extension can register its callbacks.
///
/// [`default_settings`]: Extension::default_settings
/// [`required_settings`]: Extension::required_settings
/// [`init_app`]: Extension::init_app
pub trait Extension: Send + Sync {
    /// Registry key; stored lowercased.
    fn name(&self) -> &str;

    fn default_settings(&self) -> Settings {
        Settings::new()
    }

    /// Keys that must be present once defaults are applied.
    fn required_settings(&self) -> &[&'static str] {
        &[]
    }

    fn init_app(&self, app: &mut Application) -> Result<()>;
}

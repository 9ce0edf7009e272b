//! User-tunable settings and the `key=value` file they live in.
//!
//! The file holds one setting per line. Scalars are written as
//! `key=<value>\n`, floats with six decimals. Byte strings are written as
//! `key=<len>:<bytes>\n` so they may contain anything, newlines included.
//! Which of the three a key holds is fixed by a schema the reader supplies;
//! lines for keys outside the schema are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::SettingsError;
use crate::playback::{BackendKind, VrPlayback};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VariantType {
    F32,
    I32,
    Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    F32(f32),
    I32(i32),
    Bytes(Vec<u8>),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::F32(_) => VariantType::F32,
            Variant::I32(_) => VariantType::I32,
            Variant::Bytes(_) => VariantType::Bytes,
        }
    }
}

/// The contents of a settings file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettingsFile {
    entries: BTreeMap<String, Variant>,
}

impl SettingsFile {
    pub fn new() -> SettingsFile {
        SettingsFile::default()
    }

    /// Read `path`. A missing file reads as an empty one.
    pub fn load<P: AsRef<Path>>(path: P, schema: &[(&str, VariantType)]) -> Result<SettingsFile, SettingsError> {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(bytes) => {
                let file = SettingsFile::parse(&bytes, schema);
                log::info!("loaded {} settings from {}", file.entries.len(), path.display());
                Ok(file)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::info!("no settings file at {}; using defaults", path.display());
                Ok(SettingsFile::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes())?;
        log::info!("saved {} settings to {}", self.entries.len(), path.display());
        Ok(())
    }

    pub fn parse(mut text: &[u8], schema: &[(&str, VariantType)]) -> SettingsFile {
        let mut entries = BTreeMap::new();

        while !text.is_empty() {
            // Only a byte string's contents may run past the end of its line.
            let line = line_len(text);
            let eq = match text[..line].iter().position(|&b| b == b'=') {
                Some(eq) => eq,
                None => {
                    if !text[..line].iter().all(u8::is_ascii_whitespace) {
                        log::warn!("skipping settings line without '=': {:?}", String::from_utf8_lossy(&text[..line]));
                    }
                    text = text.get(line + 1..).unwrap_or(&[]);
                    continue;
                }
            };
            let key = String::from_utf8_lossy(&text[..eq]).trim().to_string();
            let rest = &text[eq + 1..];
            let ty = schema.iter().find(|(name, _)| *name == key).map(|&(_, ty)| ty);

            let (value, consumed) = match ty {
                Some(VariantType::Bytes) => match parse_bytes(rest) {
                    Some((bytes, consumed)) => (Some(Variant::Bytes(bytes)), consumed),
                    None => {
                        log::warn!("setting {}: malformed byte string", key);
                        let line = line_len(rest);
                        (None, line)
                    }
                },
                Some(scalar) => {
                    let line = line_len(rest);
                    let value = String::from_utf8_lossy(&rest[..line]).trim().to_string();
                    let parsed = match scalar {
                        VariantType::F32 => value.parse().ok().map(Variant::F32),
                        _ => value.parse().ok().map(Variant::I32),
                    };
                    if parsed.is_none() {
                        log::warn!("setting {}: cannot parse {:?} as {:?}", key, value, scalar);
                    }
                    (parsed, line)
                }
                None => (None, line_len(rest)),
            };

            if let Some(value) = value {
                entries.insert(key, value);
            }
            text = &rest[consumed..];
            if text.first() == Some(&b'\n') {
                text = &text[1..];
            }
        }

        SettingsFile { entries }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in &self.entries {
            out.extend_from_slice(key.as_bytes());
            out.push(b'=');
            match value {
                Variant::F32(v) => out.extend_from_slice(format!("{:.6}", v).as_bytes()),
                Variant::I32(v) => out.extend_from_slice(v.to_string().as_bytes()),
                Variant::Bytes(bytes) => {
                    out.extend_from_slice(format!("{}:", bytes.len()).as_bytes());
                    out.extend_from_slice(bytes);
                }
            }
            out.push(b'\n');
        }
        out
    }

    pub fn set(&mut self, key: &str, value: Variant) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.entries.get(key)
    }

    pub fn get_f32(&self, key: &str) -> Result<Option<f32>, SettingsError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Variant::F32(v)) => Ok(Some(*v)),
            Some(_) => Err(wrong_type(key, "f32")),
        }
    }

    pub fn get_i32(&self, key: &str) -> Result<Option<i32>, SettingsError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Variant::I32(v)) => Ok(Some(*v)),
            Some(_) => Err(wrong_type(key, "i32")),
        }
    }

    pub fn get_bytes(&self, key: &str) -> Result<Option<&[u8]>, SettingsError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Variant::Bytes(v)) => Ok(Some(v)),
            Some(_) => Err(wrong_type(key, "a byte string")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn wrong_type(key: &str, expected: &'static str) -> SettingsError {
    SettingsError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn line_len(text: &[u8]) -> usize {
    text.iter().position(|&b| b == b'\n').unwrap_or(text.len())
}

/// Parse `<len>:<bytes>`, returning the bytes and how much input they took.
fn parse_bytes(text: &[u8]) -> Option<(Vec<u8>, usize)> {
    let colon = text.iter().position(|&b| b == b':')?;
    let len: usize = std::str::from_utf8(&text[..colon]).ok()?.trim().parse().ok()?;
    let start = colon + 1;
    let end = start.checked_add(len)?;
    let bytes = text.get(start..end)?;
    Some((bytes.to_vec(), end))
}

/// An inclusive range a setting is kept in.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> Range<T> {
    pub fn clamp(&self, value: T) -> T {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// The knobs the settings panel exposes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Settings {
    pub console_window_y_offset: i32,
    pub eye_separation_multiplier: f32,
    pub ortho_separation_multiplier: f32,
    pub status_bar_y_offset: i32,
    pub ui_scale: f32,
    pub ui_quad_distance: f32,
    pub viewport_offset_x_multiplier: f32,
    pub viewport_offset_y_multiplier: f32,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            console_window_y_offset: 480,
            eye_separation_multiplier: 4.5,
            ortho_separation_multiplier: 0.05,
            status_bar_y_offset: 282,
            ui_scale: 0.541,
            ui_quad_distance: 1.0,
            viewport_offset_x_multiplier: 0.1,
            viewport_offset_y_multiplier: 0.075,
        }
    }
}

mod keys {
    pub const CONSOLE_WINDOW_Y_OFFSET: &str = "ConsoleWindowYOffset";
    pub const EYE_SEPARATION_MULTIPLIER: &str = "EyeSeparationMultiplier";
    pub const ORTHO_SEPARATION_MULTIPLIER: &str = "OrthoSeparationMultiplier";
    pub const STATUS_BAR_Y_OFFSET: &str = "StatusBarYOffset";
    pub const UI_SCALE: &str = "UIScale";
    pub const UI_QUAD_DISTANCE: &str = "UIQuadDistance";
    pub const VIEWPORT_OFFSET_X_MULTIPLIER: &str = "ViewportOffsetMultiplierX";
    pub const VIEWPORT_OFFSET_Y_MULTIPLIER: &str = "ViewportOffsetMultiplierY";

    pub const ACTIVE_VR_BACKEND: &str = "ActiveVRBackend";
    pub const GL_QUAKE_EXE_PATH: &str = "GLQuakeExePath";
}

impl Settings {
    pub const CONSOLE_WINDOW_Y_OFFSET_RANGE: Range<i32> = Range { min: 0, max: 1000 };
    pub const EYE_SEPARATION_MULTIPLIER_RANGE: Range<f32> = Range { min: 0.0, max: 10.0 };
    pub const ORTHO_SEPARATION_MULTIPLIER_RANGE: Range<f32> = Range { min: 0.001, max: 1.0 };
    pub const STATUS_BAR_Y_OFFSET_RANGE: Range<i32> = Range { min: 0, max: 1000 };
    pub const UI_SCALE_RANGE: Range<f32> = Range { min: 0.001, max: 0.9 };
    pub const VIEWPORT_OFFSET_X_MULTIPLIER_RANGE: Range<f32> = Range { min: 0.075, max: 0.125 };
    pub const VIEWPORT_OFFSET_Y_MULTIPLIER_RANGE: Range<f32> = Range { min: 0.05, max: 0.1 };

    pub const SCHEMA: [(&'static str, VariantType); 8] = [
        (keys::CONSOLE_WINDOW_Y_OFFSET, VariantType::I32),
        (keys::EYE_SEPARATION_MULTIPLIER, VariantType::F32),
        (keys::ORTHO_SEPARATION_MULTIPLIER, VariantType::F32),
        (keys::STATUS_BAR_Y_OFFSET, VariantType::I32),
        (keys::UI_SCALE, VariantType::F32),
        (keys::UI_QUAD_DISTANCE, VariantType::F32),
        (keys::VIEWPORT_OFFSET_X_MULTIPLIER, VariantType::F32),
        (keys::VIEWPORT_OFFSET_Y_MULTIPLIER, VariantType::F32),
    ];

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings, SettingsError> {
        Ok(Settings::from_file(&SettingsFile::load(path, &Settings::SCHEMA)?))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        self.to_file().save(path)
    }

    /// Take every key `file` has; keep the default for the rest.
    pub fn from_file(file: &SettingsFile) -> Settings {
        let mut settings = Settings::default();
        read_into(file, keys::CONSOLE_WINDOW_Y_OFFSET, &mut settings.console_window_y_offset);
        read_into(file, keys::EYE_SEPARATION_MULTIPLIER, &mut settings.eye_separation_multiplier);
        read_into(file, keys::ORTHO_SEPARATION_MULTIPLIER, &mut settings.ortho_separation_multiplier);
        read_into(file, keys::STATUS_BAR_Y_OFFSET, &mut settings.status_bar_y_offset);
        read_into(file, keys::UI_SCALE, &mut settings.ui_scale);
        read_into(file, keys::UI_QUAD_DISTANCE, &mut settings.ui_quad_distance);
        read_into(file, keys::VIEWPORT_OFFSET_X_MULTIPLIER, &mut settings.viewport_offset_x_multiplier);
        read_into(file, keys::VIEWPORT_OFFSET_Y_MULTIPLIER, &mut settings.viewport_offset_y_multiplier);
        settings
    }

    pub fn to_file(&self) -> SettingsFile {
        let mut file = SettingsFile::new();
        file.set(keys::CONSOLE_WINDOW_Y_OFFSET, Variant::I32(self.console_window_y_offset));
        file.set(keys::EYE_SEPARATION_MULTIPLIER, Variant::F32(self.eye_separation_multiplier));
        file.set(keys::ORTHO_SEPARATION_MULTIPLIER, Variant::F32(self.ortho_separation_multiplier));
        file.set(keys::STATUS_BAR_Y_OFFSET, Variant::I32(self.status_bar_y_offset));
        file.set(keys::UI_SCALE, Variant::F32(self.ui_scale));
        file.set(keys::UI_QUAD_DISTANCE, Variant::F32(self.ui_quad_distance));
        file.set(keys::VIEWPORT_OFFSET_X_MULTIPLIER, Variant::F32(self.viewport_offset_x_multiplier));
        file.set(keys::VIEWPORT_OFFSET_Y_MULTIPLIER, Variant::F32(self.viewport_offset_y_multiplier));
        file
    }

    /// Pull every ranged setting back inside its range.
    pub fn clamp(&mut self) {
        self.console_window_y_offset = Settings::CONSOLE_WINDOW_Y_OFFSET_RANGE.clamp(self.console_window_y_offset);
        self.eye_separation_multiplier = Settings::EYE_SEPARATION_MULTIPLIER_RANGE.clamp(self.eye_separation_multiplier);
        self.ortho_separation_multiplier =
            Settings::ORTHO_SEPARATION_MULTIPLIER_RANGE.clamp(self.ortho_separation_multiplier);
        self.status_bar_y_offset = Settings::STATUS_BAR_Y_OFFSET_RANGE.clamp(self.status_bar_y_offset);
        self.ui_scale = Settings::UI_SCALE_RANGE.clamp(self.ui_scale);
        self.viewport_offset_x_multiplier =
            Settings::VIEWPORT_OFFSET_X_MULTIPLIER_RANGE.clamp(self.viewport_offset_x_multiplier);
        self.viewport_offset_y_multiplier =
            Settings::VIEWPORT_OFFSET_Y_MULTIPLIER_RANGE.clamp(self.viewport_offset_y_multiplier);
    }

    /// Set one setting by its file key, parsing `value` as the key's type.
    pub fn set_by_key(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let ty = Settings::SCHEMA
            .iter()
            .find(|(name, _)| *name == key)
            .map(|&(_, ty)| ty)
            .ok_or_else(|| wrong_type(key, "a known setting"))?;
        let mut file = self.to_file();
        let parsed = match ty {
            VariantType::I32 => value.trim().parse().ok().map(Variant::I32),
            _ => value.trim().parse().ok().map(Variant::F32),
        };
        match parsed {
            Some(parsed) => file.set(key, parsed),
            None => {
                return Err(wrong_type(
                    key,
                    if ty == VariantType::I32 { "an integer" } else { "a number" },
                ))
            }
        }
        *self = Settings::from_file(&file);
        Ok(())
    }
}

trait FromVariant: Sized {
    fn from_variant(file: &SettingsFile, key: &str) -> Result<Option<Self>, SettingsError>;
}

impl FromVariant for f32 {
    fn from_variant(file: &SettingsFile, key: &str) -> Result<Option<f32>, SettingsError> {
        file.get_f32(key)
    }
}

impl FromVariant for i32 {
    fn from_variant(file: &SettingsFile, key: &str) -> Result<Option<i32>, SettingsError> {
        file.get_i32(key)
    }
}

fn read_into<T: FromVariant>(file: &SettingsFile, key: &str, slot: &mut T) {
    match T::from_variant(file, key) {
        Ok(Some(value)) => *slot = value,
        Ok(None) => (),
        Err(err) => log::warn!("{}; keeping the default", err),
    }
}

/// Height of the settings panel under the preview, in pixels. Backends that
/// need more hand-tuning get more sliders.
pub fn settings_panel_height(playback: &dyn VrPlayback) -> u32 {
    let mut height = 60;
    if !playback.supports_separate_ui_texture() {
        height += 80;
    }
    if playback.needs_manual_viewport_adjustment() {
        height += 40;
    }
    height
}

/// What the launcher remembers between runs.
#[derive(Clone, Debug, PartialEq)]
pub struct LauncherSettings {
    pub active_backend: BackendKind,
    pub game_exe_path: Option<PathBuf>,
}

impl Default for LauncherSettings {
    fn default() -> LauncherSettings {
        LauncherSettings {
            active_backend: BackendKind::OpenXr,
            game_exe_path: None,
        }
    }
}

impl LauncherSettings {
    pub const SCHEMA: [(&'static str, VariantType); 2] = [
        (keys::ACTIVE_VR_BACKEND, VariantType::Bytes),
        (keys::GL_QUAKE_EXE_PATH, VariantType::Bytes),
    ];

    pub fn load<P: AsRef<Path>>(path: P) -> Result<LauncherSettings, SettingsError> {
        Ok(LauncherSettings::from_file(&SettingsFile::load(path, &LauncherSettings::SCHEMA)?))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        self.to_file().save(path)
    }

    pub fn from_file(file: &SettingsFile) -> LauncherSettings {
        let mut settings = LauncherSettings::default();
        match file.get_bytes(keys::ACTIVE_VR_BACKEND) {
            Ok(Some(name)) => match BackendKind::from_name(&String::from_utf8_lossy(name)) {
                Some(kind) => settings.active_backend = kind,
                None => log::warn!("unknown VR backend {:?} in launcher settings", String::from_utf8_lossy(name)),
            },
            Ok(None) => (),
            Err(err) => log::warn!("{}", err),
        }
        match file.get_bytes(keys::GL_QUAKE_EXE_PATH) {
            Ok(Some(path)) if !path.is_empty() => {
                settings.game_exe_path = Some(PathBuf::from(String::from_utf8_lossy(path).into_owned()));
            }
            Ok(_) => (),
            Err(err) => log::warn!("{}", err),
        }
        settings
    }

    pub fn to_file(&self) -> SettingsFile {
        let mut file = SettingsFile::new();
        file.set(
            keys::ACTIVE_VR_BACKEND,
            Variant::Bytes(self.active_backend.name().as_bytes().to_vec()),
        );
        if let Some(path) = &self.game_exe_path {
            file.set(
                keys::GL_QUAKE_EXE_PATH,
                Variant::Bytes(path.to_string_lossy().as_bytes().to_vec()),
            );
        }
        file
    }
}

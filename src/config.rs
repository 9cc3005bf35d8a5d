use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use std::{
    fs,
    io::Write,
    path::PathBuf,
};

use serde::Deserialize;

use crate::reading::GridShape;

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

/// Detection constants, fixed for the lifetime of a tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    pub new_object: f64,
    pub delete_object: f64,
    pub calibration_cycles: u64,
    pub test_cycles: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    pub grid: GridShape,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> PathBuf {
    let home = UserDirs::new().unwrap().home_dir().to_path_buf();
    home.join(".config").join("loadctl")
}

fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

fn active_ptr_path() -> PathBuf {
    config_dir().join("active")
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir();
        let profdir = profiles_dir();
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = active_ptr_path();
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = Self::load_profile(&active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = Self::load_profile(&self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.reload()?;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if let Some(ext) = e.path().extension() {
                    if ext == "toml" {
                        if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                            v.push(stem.to_string());
                        }
                    }
                }
            }
        }
        v.sort();
        v
    }

    fn load_profile(name: &str) -> Result<Profile> {
        let path = profiles_dir().join(format!("{name}.toml"));
        let txt = fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        let profile: Profile =
            toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let control = crate::ipc::runtime::socket_path();
        let data = crate::ipc::runtime::data_socket_path();
        serde_json::json!({
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "grid": {
                "height": self.profile.grid.height,
                "width": self.profile.grid.width,
            },
            "control_socket": { "path": control, "present": control.exists() },
            "data_socket": { "path": data, "present": data.exists() },
            "hints": {
                "sensor_bridge": "pipe one JSON snapshot per line into the data socket",
                "snapshot_shape": "nested rows or a flat array; cell count must be height*width",
            }
        })
    }
}

fn validate_profile(p: &Profile) -> Result<()> {
    if p.grid.height == 0 || p.grid.width == 0 {
        return Err(anyhow!("grid dimensions must be non-zero"));
    }
    if !(p.thresholds.new_object > 0.0 && p.thresholds.new_object.is_finite()) {
        return Err(anyhow!("thresholds.new_object must be a positive number"));
    }
    if !(p.thresholds.delete_object > 0.0 && p.thresholds.delete_object.is_finite()) {
        return Err(anyhow!("thresholds.delete_object must be a positive number"));
    }
    // a window of 1 would finalize on its seed and never average anything
    if p.thresholds.calibration_cycles < 2 || p.thresholds.test_cycles < 2 {
        return Err(anyhow!("cycle windows must be at least 2"));
    }
    Ok(())
}

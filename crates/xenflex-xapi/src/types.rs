//! Opaque references and the record shapes returned by `get_all_records`.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! opaque_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(reference: impl Into<String>) -> Self {
                Self(reference.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_ref!(
    /// An authenticated session on the management endpoint.
    SessionRef
);
opaque_ref!(VmRef);
opaque_ref!(
    /// Virtual disk image.
    VdiRef
);
opaque_ref!(
    /// Virtual block device: the binding of a VDI to a VM.
    VbdRef
);
opaque_ref!(VifRef);
opaque_ref!(
    /// Storage repository.
    SrRef
);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VbdMode {
    #[serde(rename = "RO")]
    ReadOnly,
    #[default]
    #[serde(rename = "RW")]
    ReadWrite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VbdType {
    #[default]
    Disk,
    #[serde(rename = "CD")]
    Cd,
    Floppy,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VdiType {
    User,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdiRecord {
    #[serde(default)]
    pub name_label: String,
    #[serde(default)]
    pub name_description: String,
    #[serde(rename = "SR", default)]
    pub sr: SrRef,
    #[serde(default, deserialize_with = "int_or_string")]
    pub virtual_size: i64,
    #[serde(default)]
    pub is_a_snapshot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbdRecord {
    #[serde(rename = "VM", default)]
    pub vm: VmRef,
    #[serde(rename = "VDI", default)]
    pub vdi: VdiRef,
    /// Kernel device name inside the guest (e.g. `xvdb`); empty until plugged.
    #[serde(default)]
    pub device: String,
    /// Device slot requested at creation (e.g. `"1"`).
    #[serde(default)]
    pub userdevice: String,
    #[serde(default)]
    pub currently_attached: bool,
    #[serde(default)]
    pub mode: VbdMode,
    #[serde(rename = "type", default)]
    pub vbd_type: VbdType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VifRecord {
    #[serde(rename = "VM", default)]
    pub vm: VmRef,
    #[serde(rename = "MAC", default)]
    pub mac: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub currently_attached: bool,
}

/// Arguments for `VDI.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewVdi {
    pub name_label: String,
    pub name_description: String,
    #[serde(rename = "SR")]
    pub sr: SrRef,
    pub virtual_size: i64,
    #[serde(rename = "type")]
    pub vdi_type: VdiType,
    pub sharable: bool,
    pub read_only: bool,
    pub other_config: BTreeMap<String, String>,
    pub xenstore_data: BTreeMap<String, String>,
    pub sm_config: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

impl NewVdi {
    /// A plain user disk of `virtual_size` bytes.
    pub fn user_disk(
        name_label: impl Into<String>,
        name_description: impl Into<String>,
        sr: SrRef,
        virtual_size: i64,
    ) -> Self {
        Self {
            name_label: name_label.into(),
            name_description: name_description.into(),
            sr,
            virtual_size,
            vdi_type: VdiType::User,
            sharable: false,
            read_only: false,
            other_config: BTreeMap::new(),
            xenstore_data: BTreeMap::new(),
            sm_config: BTreeMap::new(),
            tags: Vec::new(),
        }
    }
}

/// Arguments for `VBD.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewVbd {
    #[serde(rename = "VM")]
    pub vm: VmRef,
    #[serde(rename = "VDI")]
    pub vdi: VdiRef,
    pub userdevice: String,
    pub bootable: bool,
    pub mode: VbdMode,
    #[serde(rename = "type")]
    pub vbd_type: VbdType,
    pub unpluggable: bool,
    pub empty: bool,
    pub other_config: BTreeMap<String, String>,
    pub qos_algorithm_type: String,
    pub qos_algorithm_params: BTreeMap<String, String>,
}

impl NewVbd {
    /// A hot-unpluggable, non-bootable disk binding at `userdevice`.
    pub fn hotplug_disk(vm: VmRef, vdi: VdiRef, userdevice: impl Into<String>, mode: VbdMode) -> Self {
        Self {
            vm,
            vdi,
            userdevice: userdevice.into(),
            bootable: false,
            mode,
            vbd_type: VbdType::Disk,
            unpluggable: true,
            empty: false,
            other_config: BTreeMap::new(),
            qos_algorithm_type: String::new(),
            qos_algorithm_params: BTreeMap::new(),
        }
    }
}

// int64 fields arrive as numbers from some endpoints and as strings from others.
fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(v) => Ok(v),
        IntOrString::Str(s) => s.parse().map_err(de::Error::custom),
    }
}

//! Known controller signatures.
//!
//! A [`VendorSignature`] is a `(vendor_id, product_id)` pair plus a display name
//! and the [`DecoderFamily`] that understands the device's reports. The
//! [`VendorRegistry`] holds them, never stores the same pair twice, and answers
//! exact lookups during discovery.
//!
//! Definitions can be registered one by one, in bulk ([`VendorRegistry::load_all`]),
//! or parsed from JSON / TOML documents. Untyped documents are validated per entry:
//! a bad record is logged and skipped, the rest still load.
//!
//! # Example
//! ```
//! use padlink::vendor::VendorRegistry;
//!
//! let mut reg = VendorRegistry::new();
//! let pad = reg.register(0x045e, 0x02ea, "Xbox One S Controller");
//! let again = reg.register(0x045e, 0x02ea, "Renamed");
//! assert_eq!(again.name, "Xbox One S Controller");
//! assert_eq!(reg.len(), 1);
//! assert!(reg.lookup(0x045e, 0x02ea).is_some());
//! # let _ = pad;
//! ```

use crate::decoders::DecoderFamily;
use crate::error::{GamepadError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Built-in signature table.
const DEFAULT_VENDORS: &str = include_str!("../vendors/default-vendors.json");

/// An immutable controller signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VendorSignature {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    pub family: DecoderFamily,
}

/// Shared handle to a registered signature. Sessions keep one of these.
pub type SignatureHandle = Arc<VendorSignature>;

/// One record of a vendor definition file.
///
/// Field names are accepted in both `vendorId` and `vendor_id` spelling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorDef {
    #[serde(alias = "vendor_id")]
    pub vendor_id: u16,
    #[serde(alias = "product_id")]
    pub product_id: u16,
    pub name: String,
    #[serde(default)]
    pub family: DecoderFamily,
}

impl VendorDef {
    pub fn new(vendor_id: u16, product_id: u16, name: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            name: name.into(),
            family: DecoderFamily::default(),
        }
    }

    /// USB-IF never assigns id `0x0000`; such records are treated as malformed,
    /// as are records with a blank name.
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GamepadError::InvalidDefinition(format!(
                "{:04x}:{:04x} has no name",
                self.vendor_id, self.product_id
            )));
        }
        if self.vendor_id == 0 {
            return Err(GamepadError::InvalidDefinition(format!(
                "vendor id 0x0000 is not valid ({:?})",
                self.name
            )));
        }
        if self.product_id == 0 {
            return Err(GamepadError::InvalidDefinition(format!(
                "product id 0x0000 is not valid ({:?})",
                self.name
            )));
        }
        Ok(())
    }
}

/// Outcome of a bulk load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Newly registered signatures.
    pub added: usize,
    /// Records whose pair was already present (first write kept).
    pub duplicates: usize,
    /// Per-entry rejection messages, in input order.
    pub rejected: Vec<String>,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.added += other.added;
        self.duplicates += other.duplicates;
        self.rejected.extend(other.rejected);
    }
}

#[derive(Deserialize)]
struct TomlDefs {
    #[serde(default)]
    vendor: Vec<toml::Value>,
}

/// Registry of known controller signatures, in insertion order.
#[derive(Debug, Default)]
pub struct VendorRegistry {
    entries: Vec<SignatureHandle>,
    index: HashMap<(u16, u16), usize>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in signature table.
    pub fn with_defaults() -> Result<Self> {
        let mut reg = Self::new();
        reg.load_defaults()?;
        Ok(reg)
    }

    /// Register a signature using the default decoder family.
    ///
    /// If the pair is already known, the existing handle is returned and `name` is ignored.
    pub fn register(&mut self, vendor_id: u16, product_id: u16, name: &str) -> SignatureHandle {
        self.register_with_family(vendor_id, product_id, name, DecoderFamily::default())
    }

    pub fn register_with_family(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        name: &str,
        family: DecoderFamily,
    ) -> SignatureHandle {
        self.insert(vendor_id, product_id, name, family).0
    }

    /// Insert unless present. The bool is `true` if a new entry was created.
    fn insert(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        name: &str,
        family: DecoderFamily,
    ) -> (SignatureHandle, bool) {
        if let Some(&i) = self.index.get(&(vendor_id, product_id)) {
            return (self.entries[i].clone(), false);
        }

        let handle = Arc::new(VendorSignature {
            vendor_id,
            product_id,
            name: name.to_string(),
            family,
        });
        self.index.insert((vendor_id, product_id), self.entries.len());
        self.entries.push(handle.clone());
        (handle, true)
    }

    /// Exact match on both ids.
    pub fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<SignatureHandle> {
        self.index
            .get(&(vendor_id, product_id))
            .map(|&i| self.entries[i].clone())
    }

    /// Register every definition in order. Duplicates are skipped, malformed
    /// entries are rejected individually.
    pub fn load_all<'a>(&mut self, defs: impl IntoIterator<Item = &'a VendorDef>) -> LoadReport {
        let mut report = LoadReport::default();
        for def in defs {
            if let Err(e) = def.validate() {
                warn!(error = %e, "rejected vendor definition");
                report.rejected.push(e.to_string());
                continue;
            }
            let (_, added) = self.insert(def.vendor_id, def.product_id, &def.name, def.family);
            if added {
                report.added += 1;
            } else {
                debug!(
                    vendor_id = def.vendor_id,
                    product_id = def.product_id,
                    name = %def.name,
                    "duplicate vendor definition ignored"
                );
                report.duplicates += 1;
            }
        }
        report
    }

    /// Load a JSON array of definition records.
    ///
    /// The document must be an array; each element is checked on its own.
    pub fn load_json_str(&mut self, text: &str) -> Result<LoadReport> {
        let records: Vec<serde_json::Value> = serde_json::from_str(text)?;
        let mut parsed = Vec::with_capacity(records.len());
        let mut report = LoadReport::default();

        for (i, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<VendorDef>(record) {
                Ok(def) => parsed.push(def),
                Err(e) => {
                    warn!(entry = i, error = %e, "rejected vendor definition");
                    report.rejected.push(format!("entry {i}: {e}"));
                }
            }
        }

        report.merge(self.load_all(&parsed));
        Ok(report)
    }

    /// Load `[[vendor]]` tables from a TOML document.
    pub fn load_toml_str(&mut self, text: &str) -> Result<LoadReport> {
        let doc: TomlDefs = toml::from_str(text)?;
        let mut parsed = Vec::with_capacity(doc.vendor.len());
        let mut report = LoadReport::default();

        for (i, record) in doc.vendor.into_iter().enumerate() {
            match record.try_into::<VendorDef>() {
                Ok(def) => parsed.push(def),
                Err(e) => {
                    warn!(entry = i, error = %e, "rejected vendor definition");
                    report.rejected.push(format!("entry {i}: {e}"));
                }
            }
        }

        report.merge(self.load_all(&parsed));
        Ok(report)
    }

    /// Load a definition file. `.toml` files are read as TOML, anything else as JSON.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let report = if is_toml {
            self.load_toml_str(&text)?
        } else {
            self.load_json_str(&text)?
        };
        debug!(
            path = %path.display(),
            added = report.added,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "loaded vendor definitions"
        );
        Ok(report)
    }

    /// Load the built-in signature table.
    pub fn load_defaults(&mut self) -> Result<LoadReport> {
        self.load_json_str(DEFAULT_VENDORS)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Signatures in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SignatureHandle> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_wins() {
        let mut reg = VendorRegistry::new();
        let a = reg.register(0x045e, 0x02d1, "first");
        let b = reg.register(0x045e, 0x02d1, "second");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(0x045e, 0x02d1).unwrap().name, "first");
    }

    #[test]
    fn lookup_requires_both_ids() {
        let mut reg = VendorRegistry::new();
        reg.register(0x045e, 0x02d1, "pad");
        assert!(reg.lookup(0x045e, 0x02d1).is_some());
        assert!(reg.lookup(0x045e, 0x0000).is_none());
        assert!(reg.lookup(0x02d1, 0x02d1).is_none());
        assert!(reg.lookup(0x02d1, 0x045e).is_none());
    }

    #[test]
    fn load_all_keeps_order_and_counts_duplicates() {
        let defs = vec![
            VendorDef::new(0x0001, 0x0001, "one"),
            VendorDef::new(0x0002, 0x0002, "two"),
            VendorDef::new(0x0001, 0x0001, "one again"),
            VendorDef::new(0x0000, 0x0003, "bad vendor"),
            VendorDef::new(0x0003, 0x0003, "three"),
        ];
        let mut reg = VendorRegistry::new();
        let report = reg.load_all(&defs);

        assert_eq!(report.added, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.rejected.len(), 1);
        let names: Vec<_> = reg.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["one", "two", "three"]);
    }

    #[test]
    fn json_entries_are_rejected_individually() {
        let text = r#"[
            {"vendorId": 1118, "productId": 746, "name": "Xbox One S"},
            {"vendorId": 1118, "name": "missing product"},
            {"vendorId": 70000, "productId": 1, "name": "vendor out of range"},
            {"vendor_id": 9414, "product_id": 21562, "name": "PowerA"}
        ]"#;
        let mut reg = VendorRegistry::new();
        let report = reg.load_json_str(text).unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected[0].starts_with("entry 1"));
        assert!(report.rejected[1].starts_with("entry 2"));
        assert!(reg.lookup(0x045e, 0x02ea).is_some());
        assert!(reg.lookup(0x24c6, 0x543a).is_some());
    }

    #[test]
    fn nameless_records_are_rejected() {
        let json = r#"[
            {"vendorId": 1118, "productId": 746},
            {"vendorId": 1118, "productId": 747, "name": "   "},
            {"vendorId": 1118, "productId": 748, "name": "Named"}
        ]"#;
        let mut reg = VendorRegistry::new();
        let report = reg.load_json_str(json).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected[0].starts_with("entry 0"));
        assert!(reg.lookup(0x045e, 0x02ea).is_none());
        assert!(reg.lookup(0x045e, 0x02eb).is_none());

        let toml_text = r#"
            [[vendor]]
            vendor_id = 0x1209
            product_id = 0x0001
        "#;
        let report = reg.load_toml_str(toml_text).unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.rejected.len(), 1);
        assert!(reg.lookup(0x1209, 0x0001).is_none());

        let report = reg.load_all(&[VendorDef::new(0x1209, 0x0002, "")]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn json_that_is_not_a_list_is_an_error() {
        let mut reg = VendorRegistry::new();
        let err = reg.load_json_str(r#"{"vendorId": 1}"#).unwrap_err();
        assert!(matches!(err, GamepadError::Json(_)));
        assert!(reg.is_empty());
    }

    #[test]
    fn toml_definitions_load() {
        let text = r#"
            [[vendor]]
            vendor_id = 0x045e
            product_id = 0x0b12
            name = "Xbox Series X|S"
            family = "xbox-one"

            [[vendor]]
            vendor_id = 0x045e
            product_id = -4
            name = "negative product"
        "#;
        let mut reg = VendorRegistry::new();
        let report = reg.load_toml_str(text).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.rejected.len(), 1);
        let sig = reg.lookup(0x045e, 0x0b12).unwrap();
        assert_eq!(sig.family, DecoderFamily::XboxOne);
    }

    #[test]
    fn defaults_contain_xbox_one_s() {
        let reg = VendorRegistry::with_defaults().unwrap();
        assert!(!reg.is_empty());
        let sig = reg.lookup(0x045e, 0x02ea).unwrap();
        assert_eq!(sig.family, DecoderFamily::XboxOne);
    }

    #[test]
    fn load_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("pads.json");
        let toml_path = dir.path().join("pads.toml");
        std::fs::write(&json, r#"[{"vendorId": 1, "productId": 2, "name": "j"}]"#).unwrap();
        std::fs::write(
            &toml_path,
            "[[vendor]]\nvendorId = 3\nproductId = 4\nname = \"t\"\n",
        )
        .unwrap();

        let mut reg = VendorRegistry::new();
        assert_eq!(reg.load_file(&json).unwrap().added, 1);
        assert_eq!(reg.load_file(&toml_path).unwrap().added, 1);
        assert_eq!(reg.lookup(3, 4).unwrap().name, "t");
        assert!(matches!(
            reg.load_file(dir.path().join("missing.json")),
            Err(GamepadError::Io(_))
        ));
    }
}

//! REST JSON snapshot parser and dual-buffer value cache.
//!
//! To reduce the size of the recording, names (of instances, classes or
//! variables) are mapped into numeric IDs. Instance and class IDs start from
//! 1, 0 being reserved for uninitialized/unassigned. Variable IDs are
//! per-class, start from 0 and are assigned in the order of discovery.
//!
//! Instances belonging to a given class may expose only a subset of the
//! class variables, so variable values are cached in two parallel maps per
//! instance, indexed by variable ID: current and previous. The two maps are
//! flipped with every scan, which makes change detection a straight map
//! comparison with no copying.

use std::collections::HashMap;
use std::io::Read;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::codec::VarValue;
use crate::core::errors::{LmcrecError, Result};

/// Variable type tags, as they appear in `VAR_INFO` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum VarType {
    Undefined = 0,
    Boolean = 1,
    BooleanConfig = 2,
    Counter = 3,
    Gauge = 4,
    GaugeConfig = 5,
    Numeric = 6,
    LargeNumeric = 7,
    NumericRange = 8,
    NumericConfig = 9,
    String = 10,
    StringConfig = 11,
}

impl VarType {
    /// Map a REST `Type` token onto the tag.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "Boolean" => Self::Boolean,
            "Boolean Config" => Self::BooleanConfig,
            "Counter" => Self::Counter,
            "Gauge" => Self::Gauge,
            "Gauge Config" => Self::GaugeConfig,
            "Numeric" => Self::Numeric,
            "Large Numeric" => Self::LargeNumeric,
            "Numeric Range" => Self::NumericRange,
            "Numeric Config" => Self::NumericConfig,
            "String" => Self::String,
            "String Config" => Self::StringConfig,
            _ => return None,
        })
    }

    /// Whether values of this type carry an integer payload.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Counter
                | Self::Gauge
                | Self::GaugeConfig
                | Self::Numeric
                | Self::LargeNumeric
                | Self::NumericRange
                | Self::NumericConfig
        )
    }
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} ({})", *self as u32)
    }
}

/// JSON data model of one snapshot variable.
#[derive(Debug, Deserialize)]
pub struct SnapshotVariable {
    /// Variable name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Type token (see [`VarType::from_token`]).
    #[serde(rename = "Type")]
    pub var_type: String,
    /// Raw JSON value. Numbers are kept textual so 64-bit integers never
    /// round-trip through floating point.
    #[serde(rename = "Value")]
    pub value: Box<RawValue>,
}

/// JSON data model of one snapshot instance (a node of the forest).
#[derive(Debug, Deserialize)]
pub struct SnapshotInstance {
    /// Instance name, unique across the whole snapshot.
    #[serde(rename = "Instance")]
    pub instance: String,
    /// Class name.
    #[serde(rename = "Class")]
    pub class: String,
    /// Variables in document order.
    #[serde(rename = "Variables", default)]
    pub variables: Vec<SnapshotVariable>,
    /// Child instances.
    #[serde(rename = "Children", default)]
    pub children: Vec<SnapshotInstance>,
}

/// Structural changes detected while populating the value cache.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ParserEvent {
    NewClass {
        name: String,
        class_id: u32,
    },
    NewVariable {
        name: String,
        var_type: VarType,
        var_id: u32,
        class_id: u32,
    },
    NewInstance {
        name: String,
        inst_id: u32,
        parent_inst_id: u32,
        class_id: u32,
    },
    InstanceDeletion {
        inst_id: u32,
    },
}

/// Per-class variable descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableInfo {
    /// Type assigned at first sight; never changes.
    pub var_type: VarType,
    /// Dense per-class ID, assigned in discovery order.
    pub var_id: u32,
}

/// Class descriptor: its ID plus the variable dictionary.
#[derive(Debug, Clone, Default)]
pub struct ClassInfo {
    /// Dense ID, `>= 1`.
    pub class_id: u32,
    /// Variable descriptors indexed by name.
    pub variables: HashMap<String, VariableInfo>,
}

/// Live cache entry for one instance.
#[derive(Debug)]
pub struct InstanceEntry {
    /// Instance name.
    pub name: String,
    /// ID from the persistent name→ID map.
    pub inst_id: u32,
    /// Parent instance ID, 0 for roots. The parent is referenced by ID only,
    /// never owned.
    pub parent_inst_id: u32,
    /// Key into the class cache.
    pub class_name: String,
    /// Dual variable value cache, indexed `[curr_index][var_id]`.
    pub variables: [HashMap<u32, VarValue>; 2],
    // Instances may be deleted, i.e. no longer appear in a scan. Each scan
    // bumps an 8-bit counter (with rollover); at the end of a scan every
    // entry whose counter doesn't match the global one gets swept.
    scan_num: u8,
}

// The double-buffer approach relies on consecutive scans belonging to the
// *same* process. The process may be restarted between scans with timing
// that leaves the REST requests unaffected, so selected variables of
// selected classes are compared against the previous scan: PID and start
// time are the obvious candidates.
fn signature_variables(class: &str) -> Option<&'static [&'static str]> {
    match class {
        "ManagedProcess.SrcDist" | "ManagedProcess.SinkDist" => Some(&["processID", "time"]),
        _ => None,
    }
}

/// The snapshot parser: value cache, event buffer, and process-identity
/// detection.
pub struct SnapshotParser {
    /// The live instance cache, indexed by ID for fast iteration.
    pub instance_cache: HashMap<u32, InstanceEntry>,
    /// Which of the two per-instance value maps is current.
    pub curr_index: usize,
    /// Events accumulated during the latest parse, in discovery order
    /// (deletions last).
    pub events: Vec<ParserEvent>,
    /// The class cache, indexed by class name.
    pub class_cache: HashMap<String, ClassInfo>,

    // Live instance lookup by name:
    live_name_id: HashMap<String, u32>,
    // Persistent name→ID mapping, so a reappearing instance keeps its ID:
    persistent_name_id: HashMap<String, u32>,
    // The scan#:
    scan_num: u8,
    // Counters for instances and variables found in the latest scan:
    num_instances: usize,
    num_variables: usize,
    // Process signature: "INSTANCE:VARIABLE" -> raw JSON value text.
    process_sig: HashMap<String, String>,
    // Reusable body buffer:
    body: Vec<u8>,
}

impl Default for SnapshotParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instance_cache: HashMap::new(),
            curr_index: 0,
            events: Vec::new(),
            class_cache: HashMap::new(),
            live_name_id: HashMap::new(),
            persistent_name_id: HashMap::new(),
            scan_num: 0,
            num_instances: 0,
            num_variables: 0,
            process_sig: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Flip which per-instance value map is current. Called by the recorder
    /// after a scan has been fully encoded.
    pub fn flip_curr_index(&mut self) {
        self.curr_index = 1 - self.curr_index;
    }

    /// Parse one snapshot.
    ///
    /// Populates the current-generation value maps, appends structural
    /// events (unless `suppress_events`; deletions are always reported), and
    /// detects process restarts. Returns `(process_changed, instance_count,
    /// variable_count)`.
    pub fn parse(
        &mut self,
        r: &mut dyn Read,
        suppress_events: bool,
    ) -> Result<(bool, usize, usize)> {
        self.body.clear();
        r.read_to_end(&mut self.body)
            .map_err(|e| LmcrecError::MalformedSnapshot {
                details: format!("body read: {e}"),
            })?;
        let doc: Vec<SnapshotInstance> = serde_json::from_slice(&self.body)?;

        let mut suppress = suppress_events;
        let mut process_changed = false;
        if self.process_sig.is_empty() {
            self.compute_signature(&doc);
            // The first scan is treated as if events were suppressed.
            suppress = true;
        } else if !self.check_signature(&doc) {
            process_changed = true;
            self.compute_signature(&doc);
            // Reset all data:
            self.instance_cache.clear();
            self.class_cache.clear();
            self.live_name_id.clear();
            self.persistent_name_id.clear();
            self.scan_num = 0;
            suppress = true;
        }

        self.num_instances = 0;
        self.num_variables = 0;
        self.events.clear();
        self.scan_num = self.scan_num.wrapping_add(1);
        self.process_list(&doc, 0, suppress)?;

        // Look for deleted instances; the sweep is skipped entirely when the
        // live cache is no bigger than what this scan touched.
        if self.instance_cache.len() > self.num_instances {
            let scan_num = self.scan_num;
            let stale: Vec<u32> = self
                .instance_cache
                .iter()
                .filter(|(_, entry)| entry.scan_num != scan_num)
                .map(|(&inst_id, _)| inst_id)
                .collect();
            for inst_id in stale {
                if let Some(entry) = self.instance_cache.remove(&inst_id) {
                    self.live_name_id.remove(&entry.name);
                    self.events.push(ParserEvent::InstanceDeletion { inst_id });
                }
            }
        }

        Ok((process_changed, self.num_instances, self.num_variables))
    }

    fn compute_signature(&mut self, doc: &[SnapshotInstance]) {
        let mut sig = HashMap::new();
        for inst in doc {
            if let Some(names) = signature_variables(&inst.class) {
                for var in &inst.variables {
                    if names.contains(&var.name.as_str()) {
                        sig.insert(
                            format!("{}:{}", inst.instance, var.name),
                            var.value.get().to_string(),
                        );
                    }
                }
            }
        }
        self.process_sig = sig;
    }

    fn check_signature(&self, doc: &[SnapshotInstance]) -> bool {
        let mut new_sig_len = 0;
        for inst in doc {
            if let Some(names) = signature_variables(&inst.class) {
                for var in &inst.variables {
                    if names.contains(&var.name.as_str()) {
                        new_sig_len += 1;
                        let key = format!("{}:{}", inst.instance, var.name);
                        if self.process_sig.get(&key).map(String::as_str) != Some(var.value.get()) {
                            return false;
                        }
                    }
                }
            }
        }
        self.process_sig.len() == new_sig_len
    }

    fn process_list(
        &mut self,
        list: &[SnapshotInstance],
        parent_inst_id: u32,
        suppress: bool,
    ) -> Result<()> {
        let curr_index = self.curr_index;
        self.num_instances += list.len();
        for snap in list {
            let existing_id = self.live_name_id.get(&snap.instance).copied();
            let (inst_id, first_seen) = if let Some(inst_id) = existing_id {
                if let Some(entry) = self.instance_cache.get_mut(&inst_id) {
                    if entry.scan_num == self.scan_num {
                        return Err(LmcrecError::DuplicateInstance {
                            inst: snap.instance.clone(),
                        });
                    }
                    // Mark the instance as found in this scan:
                    entry.scan_num = self.scan_num;
                }
                (inst_id, false)
            } else {
                let class_id = match self.class_cache.get(&snap.class) {
                    Some(class_info) => class_info.class_id,
                    None => {
                        // Assign the next class ID; 0 stays reserved.
                        let class_id = (self.class_cache.len() + 1) as u32;
                        self.class_cache.insert(
                            snap.class.clone(),
                            ClassInfo {
                                class_id,
                                variables: HashMap::new(),
                            },
                        );
                        if !suppress {
                            self.events.push(ParserEvent::NewClass {
                                name: snap.class.clone(),
                                class_id,
                            });
                        }
                        class_id
                    }
                };
                let inst_id = match self.persistent_name_id.get(&snap.instance) {
                    Some(&inst_id) => inst_id,
                    None => {
                        let inst_id = (self.persistent_name_id.len() + 1) as u32;
                        self.persistent_name_id.insert(snap.instance.clone(), inst_id);
                        inst_id
                    }
                };
                self.instance_cache.insert(
                    inst_id,
                    InstanceEntry {
                        name: snap.instance.clone(),
                        inst_id,
                        parent_inst_id,
                        class_name: snap.class.clone(),
                        variables: [HashMap::new(), HashMap::new()],
                        scan_num: self.scan_num,
                    },
                );
                self.live_name_id.insert(snap.instance.clone(), inst_id);
                if !suppress {
                    self.events.push(ParserEvent::NewInstance {
                        name: snap.instance.clone(),
                        inst_id,
                        parent_inst_id,
                        class_id,
                    });
                }
                (inst_id, true)
            };

            self.num_variables += snap.variables.len();
            self.process_variables(snap, inst_id, first_seen, curr_index, suppress)?;

            if !snap.children.is_empty() {
                self.process_list(&snap.children, inst_id, suppress)?;
            }
        }
        Ok(())
    }

    fn process_variables(
        &mut self,
        snap: &SnapshotInstance,
        inst_id: u32,
        first_seen: bool,
        curr_index: usize,
        suppress: bool,
    ) -> Result<()> {
        // The cached class binding wins over whatever the document claims for
        // an already-known instance.
        let class_name = self
            .instance_cache
            .get(&inst_id)
            .map_or_else(|| snap.class.clone(), |entry| entry.class_name.clone());
        let Some(class_info) = self.class_cache.get_mut(&class_name) else {
            return Ok(());
        };
        let Some(entry) = self.instance_cache.get_mut(&inst_id) else {
            return Ok(());
        };

        for var in &snap.variables {
            let (var_id, var_type) = match class_info.variables.get(&var.name) {
                Some(info) => {
                    if first_seen {
                        // First time instance, check variable consistency:
                        let got = VarType::from_token(&var.var_type).ok_or_else(|| {
                            LmcrecError::UnknownVarType {
                                token: var.var_type.clone(),
                                inst: snap.instance.clone(),
                                class: snap.class.clone(),
                                var: var.name.clone(),
                            }
                        })?;
                        if info.var_type != got {
                            return Err(LmcrecError::VarTypeMismatch {
                                inst: snap.instance.clone(),
                                class: snap.class.clone(),
                                var: var.name.clone(),
                                want: info.var_type.to_string(),
                                got: got.to_string(),
                            });
                        }
                    }
                    (info.var_id, info.var_type)
                }
                None => {
                    let var_type = VarType::from_token(&var.var_type).ok_or_else(|| {
                        LmcrecError::UnknownVarType {
                            token: var.var_type.clone(),
                            inst: snap.instance.clone(),
                            class: snap.class.clone(),
                            var: var.name.clone(),
                        }
                    })?;
                    let var_id = class_info.variables.len() as u32;
                    class_info
                        .variables
                        .insert(var.name.clone(), VariableInfo { var_type, var_id });
                    if !suppress {
                        self.events.push(ParserEvent::NewVariable {
                            name: var.name.clone(),
                            var_type,
                            var_id,
                            class_id: class_info.class_id,
                        });
                    }
                    (var_id, var_type)
                }
            };

            let value = decode_value(&snap.instance, var, var_type)?;
            entry.variables[curr_index].insert(var_id, value);
        }
        Ok(())
    }
}

/// Extract the leading decimal integer of a textual value, the signedness
/// decided by the first character of the (untrimmed) text.
fn scan_leading_int(text: &str) -> Option<VarValue> {
    if text.len() > 1 && text.starts_with('-') {
        let rest = &text[1..];
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        text[..=digits].parse::<i64>().ok().map(VarValue::Sint)
    } else {
        let trimmed = text.trim_start();
        let digits = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        if digits == 0 {
            return None;
        }
        trimmed[..digits].parse::<u64>().ok().map(VarValue::Uint)
    }
}

/// Convert one raw JSON value into the cacheable [`VarValue`] domain.
///
/// Numeric types keep the textual token and choose signed vs unsigned from
/// the leading character; a `NUMERIC_RANGE` string keeps only the leading
/// integer of its `"N (MIN..MAX)"` form. Everything else must be a JSON
/// string or boolean.
fn decode_value(inst: &str, var: &SnapshotVariable, var_type: VarType) -> Result<VarValue> {
    let raw = var.value.get();
    let invalid = |details: String| LmcrecError::InvalidValue {
        inst: inst.to_string(),
        var: var.name.clone(),
        details,
    };

    if var_type.is_numeric() {
        if raw.starts_with('"') {
            let text: String = serde_json::from_str(raw)
                .map_err(|e| invalid(format!("string value: {e}")))?;
            return scan_leading_int(&text)
                .ok_or_else(|| invalid(format!("no leading integer in {text:?}")));
        }
        if raw.starts_with('t') || raw.starts_with('f') || raw.starts_with('n')
            || raw.starts_with('[') || raw.starts_with('{')
        {
            return Err(invalid(format!("incompatible with {var_type}")));
        }
        if raw.len() > 1 && raw.starts_with('-') {
            return raw
                .parse::<i64>()
                .map(VarValue::Sint)
                .map_err(|e| invalid(format!("{raw:?}: {e}")));
        }
        return raw
            .parse::<u64>()
            .map(VarValue::Uint)
            .map_err(|e| invalid(format!("{raw:?}: {e}")));
    }

    if raw.starts_with('"') {
        let text: String =
            serde_json::from_str(raw).map_err(|e| invalid(format!("string value: {e}")))?;
        return Ok(VarValue::Str(text));
    }
    match raw {
        "true" => Ok(VarValue::Bool(true)),
        "false" => Ok(VarValue::Bool(false)),
        _ => Err(invalid(format!("incompatible with {var_type}"))),
    }
}

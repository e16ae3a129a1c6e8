//! Projection of parser state into encoder calls.
//!
//! Pending structural events always go out first, in discovery order. Then
//! either the full model (dictionary records plus every current value) or
//! just the values that changed since the previous generation.

use crate::codec::Encoder;
use crate::core::errors::Result;
use crate::parser::{ParserEvent, SnapshotParser};

/// The parser side of the recorder seam.
pub trait Recordable {
    /// Encode the pending events and then the value records for one scan.
    ///
    /// `full` selects the full dump (first scan of a file, after rollover,
    /// after a process change); otherwise only changed values are written.
    /// Returns the number of value records emitted.
    fn record<E: Encoder + ?Sized>(&self, encoder: &mut E, full: bool) -> Result<usize>;
}

impl Recordable for SnapshotParser {
    fn record<E: Encoder + ?Sized>(&self, encoder: &mut E, full: bool) -> Result<usize> {
        for event in &self.events {
            match event {
                ParserEvent::NewClass { name, class_id } => {
                    encoder.class_info(name, *class_id)?;
                }
                ParserEvent::NewInstance {
                    name,
                    inst_id,
                    parent_inst_id,
                    class_id,
                } => {
                    encoder.inst_info(name, *class_id, *inst_id, *parent_inst_id)?;
                }
                ParserEvent::NewVariable {
                    name,
                    var_type,
                    var_id,
                    class_id,
                } => {
                    encoder.var_info(name, *var_id, *class_id, *var_type as u32)?;
                }
                ParserEvent::InstanceDeletion { inst_id } => {
                    encoder.delete_inst_id(*inst_id)?;
                }
            }
        }

        let mut out_var_count = 0;
        let curr_index = self.curr_index;
        if full {
            for (class_name, class_info) in &self.class_cache {
                let class_id = class_info.class_id;
                encoder.class_info(class_name, class_id)?;
                for (var_name, var_info) in &class_info.variables {
                    encoder.var_info(var_name, var_info.var_id, class_id, var_info.var_type as u32)?;
                }
            }

            for (&inst_id, entry) in &self.instance_cache {
                let class_id = self
                    .class_cache
                    .get(&entry.class_name)
                    .map_or(0, |class_info| class_info.class_id);
                encoder.inst_info(&entry.name, class_id, inst_id, entry.parent_inst_id)?;
                for (&var_id, value) in &entry.variables[curr_index] {
                    encoder.var_value(var_id, value)?;
                    out_var_count += 1;
                }
            }
        } else {
            for (&inst_id, entry) in &self.instance_cache {
                let mut inst_id_published = false;
                let curr_vars = &entry.variables[curr_index];
                let prev_vars = &entry.variables[1 - curr_index];
                for (&var_id, curr_value) in curr_vars {
                    if prev_vars.get(&var_id) != Some(curr_value) {
                        if !inst_id_published {
                            encoder.set_inst_id(inst_id)?;
                            inst_id_published = true;
                        }
                        encoder.var_value(var_id, curr_value)?;
                        out_var_count += 1;
                    }
                }
            }
        }
        Ok(out_var_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Record, RecordDecoder, StreamEncoder, VarValue};

    fn parse(parser: &mut SnapshotParser, json: &str, suppress: bool) {
        parser.parse(&mut json.as_bytes(), suppress).unwrap();
    }

    fn drain(bytes: &[u8]) -> Vec<Record> {
        let mut dec = RecordDecoder::new(bytes);
        let mut records = Vec::new();
        while let Some(rec) = dec.next_record().unwrap() {
            records.push(rec);
        }
        records
    }

    const SCAN: &str = r#"[
        {"Instance": "i", "Class": "C",
         "Variables": [
            {"Name": "x", "Type": "Counter", "Value": 7},
            {"Name": "y", "Type": "String", "Value": "hi"}
         ],
         "Children": []}
    ]"#;

    #[test]
    fn full_dump_emits_dictionary_then_values() {
        let mut parser = SnapshotParser::new();
        parse(&mut parser, SCAN, false);

        let mut enc = StreamEncoder::new(Vec::new());
        let out = parser.record(&mut enc, true).unwrap();
        assert_eq!(out, 2);

        let records = drain(&enc.into_inner());
        assert!(records.contains(&Record::ClassInfo {
            class_id: 1,
            name: "C".to_string()
        }));
        assert!(records.contains(&Record::InstInfo {
            class_id: 1,
            inst_id: 1,
            parent_inst_id: 0,
            name: "i".to_string()
        }));
        assert!(records.contains(&Record::VarInfo {
            class_id: 1,
            var_id: 0,
            var_type: 3,
            name: "x".to_string()
        }));
        assert!(records.contains(&Record::VarValue {
            var_id: 0,
            value: VarValue::Uint(7)
        }));
        assert!(records.contains(&Record::VarValue {
            var_id: 1,
            value: VarValue::Str("hi".to_string())
        }));
    }

    #[test]
    fn incremental_emits_only_changed_values() {
        let mut parser = SnapshotParser::new();
        parse(&mut parser, SCAN, false);
        parser.flip_curr_index();
        parse(&mut parser, &SCAN.replace('7', "9"), false);

        let mut enc = StreamEncoder::new(Vec::new());
        let out = parser.record(&mut enc, false).unwrap();
        assert_eq!(out, 1);

        let records = drain(&enc.into_inner());
        assert_eq!(
            records,
            vec![
                Record::SetInstId { inst_id: 1 },
                Record::VarValue {
                    var_id: 0,
                    value: VarValue::Uint(9)
                },
            ]
        );
    }

    #[test]
    fn unchanged_scan_emits_nothing() {
        let mut parser = SnapshotParser::new();
        parse(&mut parser, SCAN, false);
        parser.flip_curr_index();
        parse(&mut parser, SCAN, false);

        let mut enc = StreamEncoder::new(Vec::new());
        let out = parser.record(&mut enc, false).unwrap();
        assert_eq!(out, 0);
        assert!(enc.into_inner().is_empty());
    }

    #[test]
    fn deletion_event_precedes_values() {
        let mut parser = SnapshotParser::new();
        let two = r#"[
            {"Instance": "i", "Class": "C", "Variables": [], "Children": []},
            {"Instance": "j", "Class": "C", "Variables": [], "Children": []}
        ]"#;
        let one = r#"[
            {"Instance": "i", "Class": "C", "Variables": [], "Children": []}
        ]"#;
        parse(&mut parser, two, false);
        parser.flip_curr_index();
        parse(&mut parser, one, false);

        let mut enc = StreamEncoder::new(Vec::new());
        parser.record(&mut enc, false).unwrap();
        let records = drain(&enc.into_inner());
        assert_eq!(records, vec![Record::DeleteInstId { inst_id: 2 }]);
    }
}

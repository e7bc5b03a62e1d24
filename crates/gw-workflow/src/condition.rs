//! Step conditions (§4.7): compiled with the same boolean filter language
//! event subscriptions use (`gw_core::filter`), evaluated against a flat
//! document built from every step's recorded output, so a condition can
//! write `{"fetch.result.ok": true}` the same way an event filter writes
//! `{"field": value}` — the dotted path is just another field name.

use std::collections::{BTreeMap, HashMap};

use gw_core::wire::Value as WireValue;
use serde_json::Value;

pub fn flatten_outputs(outputs: &HashMap<String, Value>) -> WireValue {
    let mut flat = BTreeMap::new();
    for (step_id, output) in outputs {
        flatten_into(step_id, output, &mut flat);
    }
    WireValue::Map(flat)
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, WireValue>) {
    out.insert(prefix.to_string(), value.clone().into());
    if let Value::Object(map) = value {
        for (k, v) in map {
            flatten_into(&format!("{prefix}.{k}"), v, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::filter::compile;
    use serde_json::json;

    #[test]
    fn flattened_doc_matches_dotted_condition() {
        let mut outputs = HashMap::new();
        outputs.insert("fetch".to_string(), json!({"result": {"ok": true}}));
        let doc = flatten_outputs(&outputs);
        let filter = compile(&json!({"fetch.result.ok": true})).unwrap();
        assert!(filter.matches(&doc));
    }

    #[test]
    fn condition_on_missing_step_does_not_match() {
        let outputs = HashMap::new();
        let doc = flatten_outputs(&outputs);
        let filter = compile(&json!({"fetch.result.ok": true})).unwrap();
        assert!(!filter.matches(&doc));
    }
}

//! Raw DICOM headers as JSON dictionaries keyed by `GGGGEEEE`.

use std::{fs::File, io::BufWriter, path::Path};

use dicom::core::{
    DataElement, Tag,
    header::Header,
    value::{PrimitiveValue, Value},
};
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use serde_json::{Map, Value as Json, json};

pub type HeaderDict = Map<String, Json>;

/// Tag key in the DICOM JSON model, e.g. `0020000E`.
pub fn tag_key(tag: Tag) -> String {
    format!("{:04X}{:04X}", tag.group(), tag.element())
}

/// Convert a data set to a header dictionary, leaving out pixel data.
pub fn header_dict(dicom_object: &InMemDicomObject) -> HeaderDict {
    let mut dict = Map::new();
    for element in dicom_object.iter() {
        if element.tag() == tags::PIXEL_DATA {
            continue;
        }
        dict.insert(tag_key(element.tag()), element_json(element));
    }
    dict
}

fn element_json(element: &DataElement<InMemDicomObject>) -> Json {
    let vr = element.vr().to_string();
    let mut entry = Map::new();
    entry.insert("vr".to_string(), Json::String(vr.into()));

    let values = match element.value() {
        Value::Sequence(seq) => Some(
            seq.items()
                .iter()
                .map(|item| Json::Object(header_dict(item)))
                .collect::<Vec<_>>(),
        ),
        Value::Primitive(primitive) => primitive_values(primitive, vr),
        _ => None,
    };
    if let Some(values) = values.filter(|v| !v.is_empty()) {
        entry.insert("Value".to_string(), Json::Array(values));
    }
    Json::Object(entry)
}

fn primitive_values(primitive: &PrimitiveValue, vr: &str) -> Option<Vec<Json>> {
    use PrimitiveValue::*;

    let values = match primitive {
        Empty => return None,
        // bulk binary is not kept
        U8(_) => return None,
        U16(vals) => vals.iter().map(|&v| json!(v)).collect(),
        U32(vals) => vals.iter().map(|&v| json!(v)).collect(),
        U64(vals) => vals.iter().map(|&v| json!(v)).collect(),
        I16(vals) => vals.iter().map(|&v| json!(v)).collect(),
        I32(vals) => vals.iter().map(|&v| json!(v)).collect(),
        I64(vals) => vals.iter().map(|&v| json!(v)).collect(),
        F32(vals) => vals.iter().map(|&v| json!(v)).collect(),
        F64(vals) => vals.iter().map(|&v| json!(v)).collect(),
        Tags(vals) => vals.iter().map(|&t| json!(tag_key(t))).collect(),
        Str(_) | Strs(_) | Date(_) | Time(_) | DateTime(_) => primitive
            .to_multi_str()
            .iter()
            .map(|s| string_json(s.trim_end_matches('\0').trim(), vr))
            .collect(),
    };
    Some(values)
}

fn string_json(value: &str, vr: &str) -> Json {
    match vr {
        "PN" => json!({ "Alphabetic": value }),
        "DS" | "IS" => value
            .parse::<f64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(value)),
        _ => json!(value),
    }
}

/// Accumulates the union of header keys in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct HeaderKeys {
    keys: Vec<String>,
}

impl HeaderKeys {
    pub fn extend_from(&mut self, dict: &HeaderDict) {
        for key in dict.keys() {
            if !self.keys.contains(key) {
                self.keys.push(key.clone());
            }
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

pub fn write_headers_json(path: &Path, headers: &[HeaderDict]) -> std::io::Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, headers)?;
    Ok(())
}

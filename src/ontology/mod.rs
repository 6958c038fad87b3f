//! Boundary with the ontology engine.
//!
//! The core never interprets query or rule syntax itself; it hands a
//! resolved tree to an [`OntologyEngine`] and gets a document back. The
//! built-in [`GraphRenderer`] covers serialization for all four target
//! syntaxes so the CLI works standalone; query, inference and rules are
//! delegated to an external engine.
//!
//! Shared subassemblies can carry different quantities under different
//! parents, so documents describe *occurrences* (one node per tree
//! position) rather than one resource per item code.

use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::bom::BomNode;
use crate::error::{BomGraphError, Result};

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const BOM_NS: &str = "urn:bomgraph:vocab#";
const OCC_BASE: &str = "urn:bomgraph:occurrence:";

/// Serialization syntaxes accepted at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSyntax {
    /// Primary XML serialization
    RdfXml,
    /// Compact triple notation
    Turtle,
    /// JSON-based linked-data notation
    JsonLd,
    /// Line-based triple notation
    NTriples,
}

impl TargetSyntax {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetSyntax::RdfXml => "rdfxml",
            TargetSyntax::Turtle => "turtle",
            TargetSyntax::JsonLd => "jsonld",
            TargetSyntax::NTriples => "ntriples",
        }
    }
}

impl fmt::Display for TargetSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetSyntax {
    type Err = BomGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rdfxml" | "rdf-xml" | "xml" => Ok(TargetSyntax::RdfXml),
            "turtle" | "ttl" => Ok(TargetSyntax::Turtle),
            "jsonld" | "json-ld" => Ok(TargetSyntax::JsonLd),
            "ntriples" | "nt" => Ok(TargetSyntax::NTriples),
            other => Err(BomGraphError::InvalidInput(format!(
                "unknown target syntax '{}'",
                other
            ))),
        }
    }
}

/// Tabular result of a query run over a rendered document.
#[derive(Debug, Clone)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// External collaborator contract. The core calls these and treats the
/// engine as opaque.
pub trait OntologyEngine: Send + Sync {
    /// Serialize a resolved tree into the target syntax.
    fn render(&self, tree: &BomNode, syntax: TargetSyntax) -> Result<String>;

    /// Run a query over a rendered document.
    fn query(&self, document: &str, query_text: &str) -> Result<QueryTable>;

    /// Run a named reasoner over a document, returning the enriched document.
    fn infer(&self, document: &str, reasoner_id: &str) -> Result<String>;

    /// Apply a rule set to a document, returning the enriched document.
    fn apply_rules(&self, document: &str, rule_text: &str) -> Result<String>;
}

/// Built-in serialization-only engine.
pub struct GraphRenderer;

impl OntologyEngine for GraphRenderer {
    fn render(&self, tree: &BomNode, syntax: TargetSyntax) -> Result<String> {
        match syntax {
            TargetSyntax::RdfXml => render_rdf_xml(tree),
            TargetSyntax::Turtle => Ok(render_triples(tree, TripleStyle::Turtle)),
            TargetSyntax::NTriples => Ok(render_triples(tree, TripleStyle::NTriples)),
            TargetSyntax::JsonLd => render_json_ld(tree),
        }
    }

    fn query(&self, _document: &str, _query_text: &str) -> Result<QueryTable> {
        Err(BomGraphError::InvalidInput(
            "query evaluation requires an external ontology engine".to_string(),
        ))
    }

    fn infer(&self, _document: &str, _reasoner_id: &str) -> Result<String> {
        Err(BomGraphError::InvalidInput(
            "inference requires an external ontology engine".to_string(),
        ))
    }

    fn apply_rules(&self, _document: &str, _rule_text: &str) -> Result<String> {
        Err(BomGraphError::InvalidInput(
            "rule application requires an external ontology engine".to_string(),
        ))
    }
}

/// Flattened view of the tree: one entry per occurrence, parent link by
/// occurrence id.
struct Occurrence<'a> {
    id: usize,
    parent: Option<usize>,
    node: &'a BomNode,
}

fn flatten(tree: &BomNode) -> Vec<Occurrence<'_>> {
    let mut out = Vec::new();
    let mut stack = vec![(tree, None::<usize>)];
    while let Some((node, parent)) = stack.pop() {
        let id = out.len() + 1;
        out.push(Occurrence { id, parent, node });
        // Reverse keeps children in stored order after the stack pop
        for child in node.children.iter().rev() {
            stack.push((child, Some(id)));
        }
    }
    out
}

fn escape_literal(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

enum TripleStyle {
    Turtle,
    NTriples,
}

fn render_triples(tree: &BomNode, style: TripleStyle) -> String {
    let occurrences = flatten(tree);
    let mut out = String::new();

    let (subject, predicate): (fn(usize) -> String, fn(&str) -> String) = match style {
        TripleStyle::Turtle => (
            |id| format!("occ:{}", id),
            |name| format!("bom:{}", name),
        ),
        TripleStyle::NTriples => (
            |id| format!("<{}{}>", OCC_BASE, id),
            |name| format!("<{}{}>", BOM_NS, name),
        ),
    };

    if matches!(style, TripleStyle::Turtle) {
        out.push_str(&format!("@prefix bom: <{}> .\n", BOM_NS));
        out.push_str(&format!("@prefix occ: <{}> .\n\n", OCC_BASE));
    }

    for occ in &occurrences {
        let s = subject(occ.id);
        let mut push = |p: &str, o: String| {
            out.push_str(&format!("{} {} {} .\n", s, predicate(p), o));
        };
        push("itemCode", format!("\"{}\"", escape_literal(&occ.node.item_code)));
        push("itemName", format!("\"{}\"", escape_literal(&occ.node.item_name)));
        push("quantity", format!("\"{}\"", occ.node.quantity));
        if let Some(spec) = &occ.node.spec_text {
            push("specText", format!("\"{}\"", escape_literal(spec)));
        }
        if let Some(date) = occ.node.effective_date {
            push("effectiveDate", format!("\"{}\"", date));
        }
        if let Some(date) = occ.node.expiry_date {
            push("expiryDate", format!("\"{}\"", date));
        }
        if let Some(code) = &occ.node.characteristic_code {
            push("characteristicCode", format!("\"{}\"", escape_literal(code)));
        }
        if let Some(parent) = occ.parent {
            let parent_subject = subject(parent);
            out.push_str(&format!(
                "{} {} {} .\n",
                parent_subject,
                predicate("hasComponent"),
                s
            ));
        }
    }

    out
}

fn render_rdf_xml(tree: &BomNode) -> Result<String> {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;

    let xml_err = |e: &dyn fmt::Display| BomGraphError::Parse(format!("xml write: {}", e));

    let occurrences = flatten(tree);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| xml_err(&e))?;

    let mut root = BytesStart::new("rdf:RDF");
    root.push_attribute(("xmlns:rdf", RDF_NS));
    root.push_attribute(("xmlns:bom", BOM_NS));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| xml_err(&e))?;

    for occ in &occurrences {
        let about = format!("{}{}", OCC_BASE, occ.id);
        let mut open = BytesStart::new("bom:BomNode");
        open.push_attribute(("rdf:about", about.as_str()));
        writer
            .write_event(Event::Start(open))
            .map_err(|e| xml_err(&e))?;

        let mut text_element = |name: &str, value: &str| -> Result<()> {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| xml_err(&e))?;
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(|e| xml_err(&e))?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| xml_err(&e))?;
            Ok(())
        };

        text_element("bom:itemCode", &occ.node.item_code)?;
        text_element("bom:itemName", &occ.node.item_name)?;
        text_element("bom:quantity", &occ.node.quantity.to_string())?;
        if let Some(spec) = &occ.node.spec_text {
            text_element("bom:specText", spec)?;
        }
        if let Some(date) = occ.node.effective_date {
            text_element("bom:effectiveDate", &date.to_string())?;
        }
        if let Some(date) = occ.node.expiry_date {
            text_element("bom:expiryDate", &date.to_string())?;
        }
        if let Some(code) = &occ.node.characteristic_code {
            text_element("bom:characteristicCode", code)?;
        }
        for child in &occurrences {
            if child.parent == Some(occ.id) {
                let resource = format!("{}{}", OCC_BASE, child.id);
                let mut link = BytesStart::new("bom:hasComponent");
                link.push_attribute(("rdf:resource", resource.as_str()));
                writer
                    .write_event(Event::Empty(link))
                    .map_err(|e| xml_err(&e))?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("bom:BomNode")))
            .map_err(|e| xml_err(&e))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("rdf:RDF")))
        .map_err(|e| xml_err(&e))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| BomGraphError::Parse(format!("xml encoding: {}", e)))
}

fn render_json_ld(tree: &BomNode) -> Result<String> {
    fn node_value(node: &BomNode, next_id: &mut usize) -> serde_json::Value {
        let id = *next_id;
        *next_id += 1;
        let mut value = json!({
            "@id": format!("{}{}", OCC_BASE, id),
            "@type": "bom:BomNode",
            "bom:itemCode": node.item_code,
            "bom:itemName": node.item_name,
            "bom:quantity": node.quantity,
        });
        let object = value.as_object_mut().expect("object literal");
        if let Some(spec) = &node.spec_text {
            object.insert("bom:specText".to_string(), json!(spec));
        }
        if let Some(date) = node.effective_date {
            object.insert("bom:effectiveDate".to_string(), json!(date.to_string()));
        }
        if let Some(date) = node.expiry_date {
            object.insert("bom:expiryDate".to_string(), json!(date.to_string()));
        }
        if let Some(code) = &node.characteristic_code {
            object.insert("bom:characteristicCode".to_string(), json!(code));
        }
        if !node.children.is_empty() {
            let children: Vec<serde_json::Value> = node
                .children
                .iter()
                .map(|c| node_value(c, next_id))
                .collect();
            object.insert("bom:hasComponent".to_string(), json!(children));
        }
        value
    }

    let mut next_id = 1;
    let document = json!({
        "@context": { "bom": BOM_NS, "rdf": RDF_NS },
        "@graph": [node_value(tree, &mut next_id)],
    });
    serde_json::to_string_pretty(&document)
        .map_err(|e| BomGraphError::Parse(format!("json-ld: {}", e)))
}

//! Interface descriptions derived from built classes.
//!
//! [`describe`] produces a serializable structure; [`render_idl`] turns it
//! into IDL text for an external stub generator. Both are the only places
//! the wire shape is derived from class models.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::builder::BuiltClass;
use crate::types::SemanticType;

/// Raised by every accessor and operation on an entity.
const ENTITY_RAISES: &[&str] = &[
    "TransactionClosedError",
    "LostLockError",
    "LockedError",
    "ObjectDeletedError",
];

/// Additionally raised by anything that mutates.
const MUTATOR_RAISES: &[&str] = &["AuthorizationError", "InvalidArgumentError"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Getter,
    Setter,
    Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentInterface {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SemanticType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInterface {
    pub name: String,
    pub kind: MethodKind,
    pub args: Vec<ArgumentInterface>,
    /// `None` for methods returning nothing
    pub returns: Option<SemanticType>,
    pub writes: bool,
    pub raises: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// A field of the companion search and dump types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInterface {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SemanticType,
    pub optional: bool,
    /// Supports a `like` predicate
    pub like: bool,
    /// Supports less-than/greater-than predicates
    pub ordered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInterface {
    pub name: String,
    /// Name of the generated interface, e.g. `SpineAccount`
    pub interface: String,
    pub key: Vec<String>,
    pub fields: Vec<FieldInterface>,
    pub methods: Vec<MethodInterface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub module: String,
    pub classes: Vec<ClassInterface>,
    /// Every exception any method raises, in first-use order
    pub exceptions: Vec<String>,
}

impl InterfaceDescription {
    pub fn class(&self, name: &str) -> Option<&ClassInterface> {
        self.classes.iter().find(|c| c.name == name)
    }
}

/// `account` -> `SpineAccount`, `phone_number` -> `SpinePhoneNumber`.
pub fn interface_name(class: &str) -> String {
    let mut name = String::from("Spine");
    for part in class.split('_').filter(|p| !p.is_empty()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name
}

fn raises(base: &[&str], declared: &[String]) -> Vec<String> {
    let mut all: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    for name in declared {
        if !all.contains(name) {
            all.push(name.clone());
        }
    }
    all
}

fn describe_class(class: &BuiltClass) -> ClassInterface {
    let model = class.model();
    let mutator: Vec<&str> = ENTITY_RAISES.iter().chain(MUTATOR_RAISES).copied().collect();
    let mut methods = Vec::new();

    for attr in model.primary.iter().chain(model.slots.iter()) {
        methods.push(MethodInterface {
            name: attr.getter_name(),
            kind: MethodKind::Getter,
            args: Vec::new(),
            returns: Some(attr.ty.clone()),
            writes: false,
            raises: raises(ENTITY_RAISES, &[]),
            doc: attr.doc.clone(),
        });
        if attr.writable {
            methods.push(MethodInterface {
                name: attr.setter_name(),
                kind: MethodKind::Setter,
                args: vec![ArgumentInterface {
                    name: format!("new_{}", attr.name),
                    ty: attr.ty.clone(),
                }],
                returns: None,
                writes: true,
                raises: raises(&mutator, &[]),
                doc: None,
            });
        }
    }

    for op in &model.operations {
        let base: &[&str] = if op.writes { &mutator } else { ENTITY_RAISES };
        methods.push(MethodInterface {
            name: op.name.clone(),
            kind: MethodKind::Operation,
            args: op
                .args
                .iter()
                .map(|a| ArgumentInterface {
                    name: a.name.clone(),
                    ty: a.ty.clone(),
                })
                .collect(),
            returns: op.returns.clone(),
            writes: op.writes,
            raises: raises(base, &op.raises),
            doc: op.doc.clone(),
        });
    }

    ClassInterface {
        name: model.name.clone(),
        interface: interface_name(&model.name),
        key: model.primary.iter().map(|p| p.name.clone()).collect(),
        fields: model
            .primary
            .iter()
            .chain(model.slots.iter())
            .map(|attr| FieldInterface {
                name: attr.name.clone(),
                ty: attr.ty.clone(),
                optional: attr.optional,
                like: attr.ty.is_text(),
                ordered: attr.ty.is_ordered(),
            })
            .collect(),
        methods,
        doc: model.doc.clone(),
    }
}

/// Describes `classes` under `module`.
pub fn describe(module: &str, classes: &[Arc<BuiltClass>]) -> InterfaceDescription {
    let classes: Vec<ClassInterface> = classes.iter().map(|c| describe_class(c)).collect();
    let mut exceptions: Vec<String> = Vec::new();
    for method in classes.iter().flat_map(|c| c.methods.iter()) {
        for name in &method.raises {
            if !exceptions.contains(name) {
                exceptions.push(name.clone());
            }
        }
    }
    InterfaceDescription {
        module: module.to_string(),
        classes,
        exceptions,
    }
}

/// Collects forward declarations, typedefs and structs in first-use order.
#[derive(Default)]
struct Headers(Vec<String>);

impl Headers {
    fn add(&mut self, header: String) {
        if !self.0.contains(&header) {
            self.0.push(header);
        }
    }

    fn type_name(&mut self, ty: &SemanticType) -> String {
        match ty {
            SemanticType::Bool => "boolean".to_string(),
            SemanticType::Int => "long".to_string(),
            SemanticType::Float => "double".to_string(),
            SemanticType::String => "string".to_string(),
            SemanticType::Entity(class) => {
                let name = interface_name(class);
                self.add(format!("interface {};", name));
                name
            }
            SemanticType::List(inner) => {
                let element = self.type_name(inner);
                self.sequence(&element)
            }
        }
    }

    fn sequence(&mut self, element: &str) -> String {
        let name = format!("{}Seq", element);
        self.add(format!("typedef sequence<{}> {};", element, name));
        name
    }
}

fn doc_comment(doc: &str, indent: &str) -> String {
    let mut out = format!("{}/**\n", indent);
    for line in doc.lines() {
        out.push_str(&format!("{}* {}\n", indent, line.trim()));
    }
    out.push_str(&format!("{}*/\n", indent));
    out
}

fn raises_clause(raises: &[String]) -> String {
    if raises.is_empty() {
        return String::new();
    }
    let qualified: Vec<String> = raises.iter().map(|e| format!("Errors::{}", e)).collect();
    format!("\n\t\traises({})", qualified.join(", "))
}

fn render_class(class: &ClassInterface, headers: &mut Headers, docs: bool) -> String {
    let mut txt = String::new();
    if docs {
        if let Some(doc) = &class.doc {
            txt.push_str(&doc_comment(doc, ""));
        }
    }

    txt.push_str(&format!("interface {} {{\n", class.interface));
    for method in &class.methods {
        if docs {
            if let Some(doc) = &method.doc {
                txt.push_str(&doc_comment(doc, "\t"));
            }
        }
        let returns = match &method.returns {
            Some(ty) => headers.type_name(ty),
            None => "void".to_string(),
        };
        let args: Vec<String> = method
            .args
            .iter()
            .map(|a| format!("in {} {}", headers.type_name(&a.ty), a.name))
            .collect();
        txt.push_str(&format!(
            "\t{} {}({}){};\n\n",
            returns,
            method.name,
            args.join(", "),
            raises_clause(&method.raises)
        ));
    }
    txt.push_str("};\n");

    // dump struct
    let struct_name = format!("{}Struct", class.interface);
    let mut body = format!("struct {} {{\n", struct_name);
    for field in &class.fields {
        body.push_str(&format!("\t{} {};\n", headers.type_name(&field.ty), field.name));
        if field.optional {
            body.push_str(&format!("\tboolean {}_exists;\n", field.name));
        }
    }
    body.push_str("};");
    headers.add(body);
    let struct_seq = headers.sequence(&struct_name);

    // search companion
    headers.add(format!("interface {};", class.interface));
    let entity_seq = headers.sequence(&class.interface);
    let searcher_raises = raises_clause(&["TransactionClosedError".to_string()]);
    txt.push_str(&format!("\ninterface {}Searcher {{\n", class.interface));
    for field in &class.fields {
        let ty = headers.type_name(&field.ty);
        txt.push_str(&format!("\tvoid set_{}(in {} value);\n", field.name, ty));
        if field.like {
            txt.push_str(&format!("\tvoid set_{}_like(in string pattern);\n", field.name));
        }
        if field.ordered {
            txt.push_str(&format!("\tvoid set_{}_less_than(in {} value);\n", field.name, ty));
            txt.push_str(&format!("\tvoid set_{}_greater_than(in {} value);\n", field.name, ty));
        }
    }
    txt.push_str(&format!("\t{} search(){};\n", entity_seq, searcher_raises));
    txt.push_str(&format!("\t{} dump(){};\n", struct_seq, searcher_raises));
    txt.push_str("};\n");
    txt
}

fn render_exceptions(exceptions: &[String], docs: bool) -> String {
    let mut txt = String::from("module Errors {\n");
    for name in exceptions {
        if docs {
            txt.push_str("\t/**\n\t* \\param explanation A short explanation.\n\t*/\n");
        }
        txt.push_str(&format!("\texception {} {{\n\t\tstring explanation;\n\t}};\n\n", name));
    }
    txt.push_str("};");
    txt
}

fn indent(text: &str) -> String {
    text.replace('\n', "\n\t")
}

/// IDL source for a whole interface description. With `docs` set, class,
/// attribute and operation docs are emitted as comments.
pub fn render_idl(description: &InterfaceDescription, docs: bool) -> String {
    let mut headers = Headers::default();
    let bodies: Vec<String> = description
        .classes
        .iter()
        .map(|class| render_class(class, &mut headers, docs))
        .collect();

    let mut txt = format!("module {} {{\n\t", description.module);
    txt.push_str(&indent(&headers.0.join("\n")));
    if !description.exceptions.is_empty() {
        txt.push_str("\n\n\t");
        txt.push_str(&indent(&render_exceptions(&description.exceptions, docs)));
    }
    txt.push_str("\n\n\t");
    txt.push_str(&indent(&bodies.join("\n")));
    txt.push_str("\n};\n");
    txt
}

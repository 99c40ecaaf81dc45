#[cfg(test)]
mod tests {
    use spine_core::{Config, Credentials, SemanticType, Spine};

    use crate::schema::Schema;
    use crate::server::{create_spine, Bootstrap};

    const HOSTS: &str = r#"{
        "module": "Cerebrum",
        "classes": [
            {
                "name": "host",
                "doc": "A machine",
                "primary": [{ "name": "id", "type": "int" }],
                "slots": [
                    { "name": "name", "type": "string", "writable": true },
                    { "name": "aliases", "type": { "list": "string" }, "optional": true },
                    { "name": "owner", "type": { "entity": "person" }, "optional": true }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_and_registers_classes() {
        let schema = Schema::parse(HOSTS).unwrap();
        assert_eq!(schema.module, "Cerebrum");
        assert_eq!(
            schema.classes[0].slots[1].ty,
            SemanticType::List(Box::new(SemanticType::String))
        );

        let (spine, _store) = Spine::in_memory(Config::default());
        schema.register(&spine).unwrap();
        let idl = spine.interface_idl(&schema.module, false);
        assert!(idl.starts_with("module Cerebrum {"));
        assert!(idl.contains("interface SpineHost {"));
    }

    #[test]
    fn module_defaults() {
        let schema = Schema::parse(r#"{ "classes": [] }"#).unwrap();
        assert_eq!(schema.module, "SpineIDL");
    }

    #[test]
    fn rejects_operations_without_handlers() {
        let schema = Schema::parse(
            r#"{ "classes": [{
                "name": "host",
                "primary": [{ "name": "id", "type": "int" }],
                "operations": [{ "name": "reboot", "writes": true }]
            }] }"#,
        )
        .unwrap();
        let (spine, _store) = Spine::in_memory(Config::default());
        assert!(schema.register(&spine).is_err());
    }

    #[test]
    fn rejects_malformed_files() {
        assert!(Schema::parse("{").is_err());
        assert!(Schema::parse(r#"{ "module": "x" }"#).is_err());
        assert!(Schema::load("/nonexistent/schema.json").is_err());
    }

    #[test]
    fn memory_backend_bootstraps_a_superuser() {
        let admin = Bootstrap {
            username: "root".to_string(),
            password: "pw".to_string(),
        };
        let spine = create_spine("memory", Config::default(), Some(&admin)).unwrap();
        assert!(spine.login(&Credentials::new("root", "pw")).is_ok());
        assert!(spine.login(&Credentials::new("root", "nope")).is_err());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        assert!(create_spine("postgres://db", Config::default(), None).is_err());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_backend_keeps_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = format!("sqlite:{}", dir.path().join("spine.db").display());
        let admin = Bootstrap {
            username: "root".to_string(),
            password: "pw".to_string(),
        };
        drop(create_spine(&storage, Config::default(), Some(&admin)).unwrap());
        let spine = create_spine(&storage, Config::default(), None).unwrap();
        assert!(spine.login(&Credentials::new("root", "pw")).is_ok());
    }
}

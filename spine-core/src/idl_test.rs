#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::builder::ClassBuilder;
    use crate::error::SpineError;
    use crate::idl::{describe, interface_name, render_idl, InterfaceDescription, MethodKind};
    use crate::model::{AttributeDescriptor, ClassModel, OperationDescriptor};
    use crate::test_support::account_builder;
    use crate::types::{SemanticType, Value};

    fn description() -> InterfaceDescription {
        let account = Arc::new(account_builder().build().unwrap());
        let transfer = ClassModel::new("bank_transfer")
            .primary(AttributeDescriptor::new("id", SemanticType::Int))
            .slot(AttributeDescriptor::new("from", SemanticType::Entity("account".into())))
            .slot(AttributeDescriptor::new(
                "tags",
                SemanticType::List(Box::new(SemanticType::String)),
            ))
            .operation(
                OperationDescriptor::new("reverse")
                    .writes()
                    .raises("AlreadyReversedError"),
            );
        let transfer = Arc::new(
            ClassBuilder::new(transfer)
                .operation("reverse", |_, _, _| Ok(Value::Null))
                .build()
                .unwrap(),
        );
        describe("SpineIDL", &[account, transfer])
    }

    #[test]
    fn interface_names() {
        assert_eq!(interface_name("account"), "SpineAccount");
        assert_eq!(interface_name("bank_transfer"), "SpineBankTransfer");
    }

    #[test]
    fn describes_generated_methods() {
        let desc = description();
        let account = desc.class("account").unwrap();
        assert_eq!(account.interface, "SpineAccount");
        assert_eq!(account.key, vec!["id".to_string()]);

        let names: Vec<&str> = account.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "get_id",
                "get_name",
                "set_name",
                "get_balance",
                "set_balance",
                "get_email",
                "set_email",
                "get_created_by",
                "deposit",
                "describe",
            ]
        );

        let deposit = account.methods.iter().find(|m| m.name == "deposit").unwrap();
        assert_eq!(deposit.kind, MethodKind::Operation);
        assert!(deposit.writes);
        assert_eq!(deposit.returns, Some(SemanticType::Int));
        assert!(deposit.raises.contains(&"AuthorizationError".to_string()));

        let describe = account.methods.iter().find(|m| m.name == "describe").unwrap();
        assert!(!describe.raises.contains(&"AuthorizationError".to_string()));
    }

    #[test]
    fn declared_exceptions_are_collected() {
        let desc = description();
        assert!(desc.exceptions.contains(&"AlreadyReversedError".to_string()));
        assert!(desc.exceptions.contains(&"LockedError".to_string()));
        for name in &desc.exceptions {
            assert_eq!(desc.exceptions.iter().filter(|e| *e == name).count(), 1);
        }
        // everything the core raises is a known exception name
        for name in desc.exceptions.iter().filter(|e| *e != "AlreadyReversedError") {
            assert!(SpineError::EXCEPTIONS.contains(&name.as_str()), "{}", name);
        }
    }

    #[test]
    fn renders_idl() {
        let idl = render_idl(&description(), false);
        assert!(idl.starts_with("module SpineIDL {"));
        assert!(idl.trim_end().ends_with("};"));
        assert!(idl.contains("interface SpineAccount {"));
        assert!(idl.contains("long get_id()"));
        assert!(idl.contains("void set_name(in string new_name)"));
        assert!(idl.contains("long deposit(in long amount)"));
        assert!(idl.contains("SpineAccount get_from()"));
        assert!(idl.contains("typedef sequence<string> stringSeq;"));
        assert!(idl.contains("stringSeq get_tags()"));
        assert!(idl.contains("typedef sequence<SpineAccount> SpineAccountSeq;"));
        assert!(idl.contains("module Errors {"));
        assert!(idl.contains("exception AlreadyReversedError {"));
        assert!(idl.contains("raises(Errors::TransactionClosedError"));
        assert!(idl.contains("interface SpineAccountSearcher {"));
        assert!(idl.contains("void set_name_like(in string pattern);"));
        assert!(idl.contains("void set_balance_less_than(in long value);"));
        assert!(idl.contains("SpineAccountStructSeq dump()"));
        assert!(idl.contains("boolean email_exists;"));
        assert!(!idl.contains("new_created_by"));
        assert!(!idl.contains("/**"));
    }

    #[test]
    fn renders_docs_on_request() {
        let idl = render_idl(&description(), true);
        assert!(idl.contains("* A user account"));
        assert!(idl.contains("* Adds to the balance and returns the new balance"));
    }

    #[test]
    fn description_round_trips_through_json() {
        let desc = description();
        let json = serde_json::to_string(&desc).unwrap();
        assert!(json.contains(r#""type":"int""#));
        let back: InterfaceDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }
}

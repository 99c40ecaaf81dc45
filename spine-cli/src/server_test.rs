#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;

    use spine_core::session::Session;
    use spine_core::{Config, Credentials, EntityKey, PrimaryKey, Spine};

    use crate::server::in_transaction;

    fn admin_session() -> (Spine, Arc<Session>) {
        let (spine, store) = Spine::in_memory(Config::default());
        let admin = EntityKey::new("person", PrimaryKey::single("admin"));
        store.add_account("admin", "secret", admin.clone());
        store.set_superuser(admin, true);
        let session = spine.login(&Credentials::new("admin", "secret")).unwrap();
        (spine, session)
    }

    #[tokio::test]
    async fn dropped_request_cancels_its_transaction() {
        let (_spine, session) = admin_session();
        let tx = session.new_transaction().unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let call = tokio::spawn(in_transaction(session.clone(), tx.id(), move |_| {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        }));

        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap()
            .unwrap();
        call.abort();
        assert!(matches!(call.await, Err(e) if e.is_cancelled()));
        assert!(tx.cancel_token().is_cancelled());

        release_tx.send(()).unwrap();
        assert!(matches!(tx.commit(), Err(spine_core::SpineError::Cancelled)));
    }

    #[tokio::test]
    async fn finished_request_leaves_the_transaction_usable() {
        let (_spine, session) = admin_session();
        let tx = session.new_transaction().unwrap();

        in_transaction(session.clone(), tx.id(), |_| Ok(())).await.unwrap();
        assert!(!tx.cancel_token().is_cancelled());
        in_transaction(session, tx.id(), |tx| tx.commit()).await.unwrap();
        assert!(!tx.is_open());
    }

    #[tokio::test]
    async fn unknown_transaction_is_rejected_before_any_work() {
        let (_spine, session) = admin_session();
        let result = in_transaction(session, 42, |_| -> spine_core::SpineResult<()> {
            panic!("must not run")
        })
        .await;
        assert!(result.is_err());
    }
}

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;

use efsf_core::{DestructionMethod, ResourceKind};
use efsf_crypto::{CertificateVerifier, CryptoProvider};
use efsf_sealed::{SealedExecution, Tracked, sealed};
use pretty_assertions::assert_eq;

fn log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn normal_exit_wipes_and_attests() {
    let crypto = Arc::new(CryptoProvider::new());
    let exec = SealedExecution::with_attestation(crypto.clone());

    let mut escaped: Option<Tracked<Vec<u8>>> = None;
    let sealed = exec
        .run(|scope| {
            let buf = scope.track(b"card-number-4111".to_vec());
            escaped = Some(buf.clone());
            Ok::<_, anyhow::Error>(buf.borrow().len())
        })
        .unwrap();

    assert_eq!(sealed.value, 16);
    assert!(escaped.unwrap().borrow().is_empty());

    let cert = sealed.certificate().unwrap();
    assert_eq!(cert.method(), DestructionMethod::SealExit);
    assert_eq!(cert.resource_kind(), ResourceKind::SealedScope);
    assert_eq!(cert.resource_id(), sealed.exit.scope_id);
    assert!(cert.resource_id().starts_with("sealed-"));
    CertificateVerifier::from_public_key(&crypto.public_key_bytes())
        .unwrap()
        .verify_certificate(cert)
        .unwrap();
}

#[test]
fn error_exit_still_cleans_up() {
    let exec = SealedExecution::new();
    let events = log();

    let mut escaped: Option<Tracked<[u8; 32]>> = None;
    let err = exec
        .run(|scope| {
            escaped = Some(scope.track([0xAA; 32]));
            let e = events.clone();
            scope.on_cleanup(move || {
                e.borrow_mut().push("cleanup".to_string());
                Ok(())
            });
            Err::<(), _>(anyhow::anyhow!("upstream rejected token"))
        })
        .unwrap_err();

    assert_eq!(err.error.to_string(), "upstream rejected token");
    assert_eq!(err.exit.callbacks_run, 1);
    assert!(err.exit.certificate.is_none());
    assert!(err.to_string().contains("upstream rejected token"));
    assert_eq!(*events.borrow(), vec!["cleanup".to_string()]);
    assert!(escaped.unwrap().borrow().iter().all(|b| *b == 0));
}

#[test]
fn panic_exit_still_wipes_and_cleans_up() {
    let crypto = Arc::new(CryptoProvider::new());
    let exec = SealedExecution::with_attestation(crypto);
    let events = log();
    let escaped: RefCell<Option<Tracked<Vec<u8>>>> = RefCell::new(None);

    let result = catch_unwind(AssertUnwindSafe(|| {
        exec.run(|scope| {
            *escaped.borrow_mut() = Some(scope.track(vec![7u8; 64]));
            let e = events.clone();
            scope.on_cleanup(move || {
                e.borrow_mut().push("cleanup".to_string());
                Ok(())
            });
            if escaped.borrow().is_some() {
                panic!("body blew up");
            }
            Ok::<_, anyhow::Error>(())
        })
    }));

    assert!(result.is_err());
    assert_eq!(*events.borrow(), vec!["cleanup".to_string()]);
    let buf = escaped.borrow_mut().take().unwrap();
    assert!(buf.borrow().is_empty());
}

#[test]
fn callbacks_run_in_order_and_failures_do_not_stop_the_rest() {
    let exec = SealedExecution::new();
    let events = log();

    let sealed = exec
        .run(|scope| {
            let buf = scope.track(String::from("session-token"));
            for (i, behaviour) in ["ok", "err", "panic", "ok"].into_iter().enumerate() {
                let e = events.clone();
                let watched = buf.clone();
                scope.on_cleanup(move || {
                    // Buffers are wiped after callbacks, so they can still read them.
                    e.borrow_mut().push(format!("{i}:{}", watched.borrow().len()));
                    match behaviour {
                        "err" => anyhow::bail!("revoke call failed"),
                        "panic" => panic!("callback {i} panicked"),
                        _ => Ok(()),
                    }
                });
            }
            Ok::<_, anyhow::Error>(())
        })
        .unwrap();

    assert_eq!(
        *events.borrow(),
        vec!["0:13", "1:13", "2:13", "3:13"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
    let exit = &sealed.exit;
    assert_eq!(exit.callbacks_run, 4);
    assert_eq!(exit.buffers_wiped, 1);
    assert_eq!(exit.callback_failures.len(), 2);
    assert_eq!(exit.callback_failures[0].index, 1);
    assert!(!exit.callback_failures[0].panicked);
    assert_eq!(exit.callback_failures[0].message, "revoke call failed");
    assert_eq!(exit.callback_failures[1].index, 2);
    assert!(exit.callback_failures[1].panicked);
    assert_eq!(exit.callback_failures[1].message, "callback 2 panicked");
    assert!(!exit.is_clean());
}

#[test]
fn explicit_enter_and_exit() {
    let exec = SealedExecution::new();
    let scope = exec.enter();
    let secret = scope.track([3u8; 8]);
    assert_eq!(scope.tracked_count(), 1);
    assert_eq!(scope.cleanup_count(), 0);
    let exit = scope.exit();
    assert_eq!(exit.buffers_wiped, 1);
    assert_eq!(*secret.borrow(), [0u8; 8]);
}

#[test]
fn sealed_wrapper_uses_a_fresh_scope_per_call() {
    let crypto = Arc::new(CryptoProvider::new());
    let decrypt_and_len = sealed(
        SealedExecution::with_attestation(crypto),
        |scope, input: &str| {
            let buf = scope.track(input.as_bytes().to_vec());
            let len = buf.borrow().len();
            Ok::<_, anyhow::Error>(len)
        },
    );

    let first = decrypt_and_len("abc").unwrap();
    let second = decrypt_and_len("abcdef").unwrap();
    assert_ne!(first.exit.scope_id, second.exit.scope_id);
    assert_eq!(
        first.certificate().unwrap().resource_id(),
        first.exit.scope_id
    );
    assert_eq!(first.value, 3);
    assert_eq!(second.into_inner(), 6);
}

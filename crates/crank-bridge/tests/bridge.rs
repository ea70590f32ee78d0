//! Host object conversion and host-facing iterables, against the in-process host.

use std::rc::Rc;

use crank_bridge::platform::memory::MemoryHost;
use crank_bridge::platform::{current_host, install_host, uninstall_host};
use crank_bridge::symbols::ITERATOR;
use crank_bridge::{
    Adapter, BodyError, Bridge, BridgeError, ComponentBody, Context, Host, HostExpr, HostValue,
    Invocation, MountContext, PropertyKey, SymbolTable,
};
use futures_util::StreamExt;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn isolated(host: &Rc<MemoryHost>) -> Bridge {
    Bridge::new(host.clone()).with_symbol_table(Rc::new(SymbolTable::new()))
}

#[test]
fn canonical_iterator_is_identical_across_call_sites() {
    init_logging();
    let host: Rc<MemoryHost> = Rc::new(MemoryHost::new().with_unstable_symbols());
    let symbols = Rc::new(SymbolTable::new());
    let rendering = Bridge::new(host.clone()).with_symbol_table(symbols.clone());
    let converting = Bridge::new(host.clone()).with_symbol_table(symbols.clone());

    let first = rendering.canonical_symbol(ITERATOR).unwrap();
    let second = converting.canonical_symbol(ITERATOR).unwrap();
    assert_eq!(first, second);
    assert_eq!(symbols.host_lookups(), 1);

    let raw_a = host.evaluate(HostExpr::WellKnownSymbol(ITERATOR)).unwrap();
    let raw_b = host.evaluate(HostExpr::WellKnownSymbol(ITERATOR)).unwrap();
    assert_ne!(raw_a, raw_b);
}

#[test]
fn installed_host_backs_the_current_bridge() {
    init_logging();
    assert!(current_host().is_none());
    assert!(matches!(
        Bridge::current().to_mapping(&HostValue::Null),
        Err(BridgeError::Unavailable)
    ));

    let host = Rc::new(MemoryHost::new());
    install_host(host.clone());
    let props = host.create_object([("count", HostValue::from(2))]);
    let mapping = Bridge::current().to_mapping(&props).unwrap();
    assert_eq!(mapping.get("count"), Some(&HostValue::from(2)));

    assert!(uninstall_host().is_some());
    assert!(!Bridge::current().is_available());
}

#[test]
fn wrapped_sequence_follows_the_iterator_protocol() {
    init_logging();
    let host = Rc::new(MemoryHost::new());
    let bridge = isolated(&host);
    let source: Vec<Result<HostValue, BodyError>> = vec![Ok(1.into()), Ok(2.into())];
    let iterable = bridge.wrap_as_iterable(source).unwrap();

    let key = PropertyKey::Symbol(iterable.symbol().clone());
    let factory = host
        .evaluate(HostExpr::GetProperty(iterable.object().as_object().unwrap(), &key))
        .unwrap();
    let iterator = host.call(&factory, iterable.object(), &[]).unwrap();
    let next = host.get(&iterator, "next").unwrap();

    let expected = [
        (HostValue::from(1), false),
        (HostValue::from(2), false),
        (HostValue::Undefined, true),
    ];
    for (value, done) in expected {
        let result = host.call(&next, &iterator, &[]).unwrap();
        assert_eq!(host.get(&result, "value").unwrap(), value);
        assert_eq!(host.get(&result, "done").unwrap(), HostValue::Bool(done));
    }
}

#[test]
fn every_iteration_gets_a_fresh_iterator_over_the_shared_source() {
    init_logging();
    let host = Rc::new(MemoryHost::new());
    let bridge = isolated(&host);
    let source: Vec<Result<HostValue, BodyError>> = vec![Ok(1.into()), Ok(2.into()), Ok(3.into())];
    let iterable = bridge.wrap_as_iterable(source).unwrap();

    let key = PropertyKey::Symbol(iterable.symbol().clone());
    let factory = host
        .evaluate(HostExpr::GetProperty(iterable.object().as_object().unwrap(), &key))
        .unwrap();
    let first = host.call(&factory, iterable.object(), &[]).unwrap();
    let second = host.call(&factory, iterable.object(), &[]).unwrap();
    assert!(first.as_object().is_some());
    assert!(second.as_object().is_some());
    assert_ne!(first, second);

    let pull = |iterator: &HostValue| {
        let next = host.get(iterator, "next").unwrap();
        let result = host.call(&next, iterator, &[]).unwrap();
        host.get(&result, "value").unwrap()
    };
    assert_eq!(pull(&first), HostValue::from(1));
    assert_eq!(pull(&second), HostValue::from(2));
    assert_eq!(pull(&first), HostValue::from(3));
    assert_eq!(host.iterate(iterable.object()).unwrap(), Vec::<HostValue>::new());
}

#[test]
fn host_for_of_consumes_wrapped_sequence_despite_unstable_symbols() {
    init_logging();
    let host = Rc::new(MemoryHost::new().with_unstable_symbols());
    let bridge = isolated(&host);
    let words = ["a", "b", "c"].map(|word| Ok::<_, BodyError>(HostValue::from(word)));
    let iterable = bridge.wrap_as_iterable(words).unwrap();

    let items = host.iterate(iterable.object()).unwrap();
    assert_eq!(items, vec![HostValue::from("a"), HostValue::from("b"), HostValue::from("c")]);
}

#[test]
fn own_string_keys_agree_between_listing_and_mapping() {
    init_logging();
    let host = Rc::new(MemoryHost::new());
    let bridge = isolated(&host);
    let object = host.create_object([
        ("title", HostValue::from("Todo")),
        ("done", HostValue::from(false)),
        ("count", HostValue::from(3)),
    ]);

    let keys = bridge.list_keys(&object).unwrap();
    let mapping = bridge.to_mapping(&object).unwrap();
    assert_eq!(keys, vec!["title", "done", "count"]);
    assert_eq!(mapping.keys().cloned().collect::<Vec<_>>(), keys);
}

#[test]
fn mapping_drops_inherited_and_hidden_keys_listing_keeps_inherited() {
    init_logging();
    let host = Rc::new(MemoryHost::new());
    let bridge = isolated(&host);
    let base = host.create_object([("inherited", HostValue::from(1))]);
    let object = host
        .create_object_with_proto(&base, [("own", HostValue::from(2))])
        .unwrap();
    host.define_hidden(&object, "hidden", HostValue::from(3)).unwrap();
    host.set_symbol(&object, ITERATOR, HostValue::Null).unwrap();

    assert_eq!(bridge.list_keys(&object).unwrap(), vec!["own", "inherited"]);
    let mapping = bridge.to_mapping(&object).unwrap();
    assert_eq!(mapping.len(), 1);
    assert_eq!(mapping.get("own"), Some(&HostValue::from(2)));
}

#[test]
fn null_and_undefined_convert_to_empty_results() {
    init_logging();
    let host = Rc::new(MemoryHost::new());
    let bridge = isolated(&host);
    for value in [HostValue::Null, HostValue::Undefined] {
        assert!(bridge.list_keys(&value).unwrap().is_empty());
        assert!(bridge.to_mapping(&value).unwrap().is_empty());
    }
    assert_eq!(host.evaluations(), 0);
}

fn countdown() -> ComponentBody {
    ComponentBody::generator(|ctx: Context| async move {
        let mut inputs = ctx.clone();
        let mut remaining = 3;
        while let Some(_props) = inputs.next().await {
            ctx.yield_(remaining).await;
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
        Ok(None)
    })
}

#[test]
fn exposed_generator_frame_runs_under_host_for_of() {
    init_logging();
    let host = Rc::new(MemoryHost::new().with_unstable_symbols());
    let bridge = isolated(&host);
    let adapter = Adapter::new();
    let descriptor = adapter.classify(&countdown());
    let Invocation::Iterator(iterator) = adapter
        .invoke(&descriptor, Default::default(), MountContext::new())
        .unwrap()
    else {
        panic!("generator bodies are invoked as iterators");
    };

    let exposed = bridge.expose_iterator(iterator).unwrap();
    let items = host.iterate(exposed.object()).unwrap();
    assert_eq!(items, vec![HostValue::from(3), HostValue::from(2), HostValue::from(1)]);
}

#[test]
fn host_throw_fails_the_exposed_frame() {
    init_logging();
    let host = Rc::new(MemoryHost::new());
    let bridge = isolated(&host);
    let adapter = Adapter::new();
    let descriptor = adapter.classify(&countdown());
    let Invocation::Iterator(iterator) = adapter
        .invoke(&descriptor, Default::default(), MountContext::new())
        .unwrap()
    else {
        panic!("generator bodies are invoked as iterators");
    };
    let exposed = bridge.expose_iterator(iterator).unwrap();
    let object = exposed.object();

    let next = host.get(object, "next").unwrap();
    let first = host.call(&next, object, &[]).unwrap();
    assert_eq!(host.get(&first, "value").unwrap(), HostValue::from(3));

    let throw = host.get(object, "throw").unwrap();
    let error = host.call(&throw, object, &[HostValue::from("abort")]).unwrap_err();
    assert!(error.message().contains("abort"));

    let after = host.call(&next, object, &[]).unwrap();
    assert_eq!(host.get(&after, "done").unwrap(), HostValue::Bool(true));
}

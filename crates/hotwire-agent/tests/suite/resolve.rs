use std::sync::atomic::Ordering;
use std::sync::Arc;

use hotwire_agent::{
    ContainerError, ContainerInstance, InstanceOrigin, InstanceResolver, ManagedRuntime,
    ProxyTarget, ResolveError, Unwrappable,
};
use hotwire_classfile::access;
use hotwire_proto::ObjectRef;

use crate::support::{ClassBuilder, FakeContainer, FakeRuntime};

const SERVICE: &str = "com.example.OrderService";

fn shape(runtime: &FakeRuntime, class_name: &str) -> hotwire_agent::ClassShape {
    runtime.loaded_class(class_name).unwrap().unwrap()
}

fn object(id: u64) -> ObjectRef {
    ObjectRef {
        id,
        class_name: SERVICE.into(),
    }
}

#[test]
fn later_container_lookup_wins_over_earlier_and_over_the_heap() {
    let runtime = FakeRuntime::new();
    runtime.load(ClassBuilder::new(SERVICE).build());
    runtime.spawn(SERVICE);

    let mut resolver = InstanceResolver::new();
    resolver.register(Arc::new(
        FakeContainer::new("spring").with(SERVICE, ContainerInstance::new(object(1))),
    ));
    resolver.register(Arc::new(
        FakeContainer::new("guice")
            .with(SERVICE, ContainerInstance::new(object(2)))
            .with(SERVICE, ContainerInstance::new(object(3))),
    ));
    // Found nothing: does not override the earlier hit.
    resolver.register(Arc::new(FakeContainer::new("cdi")));

    let resolved = resolver
        .resolve(runtime.as_ref(), &shape(&runtime, SERVICE), false)
        .unwrap();
    assert_eq!(resolved.object, object(3));
    assert_eq!(
        resolved.origin,
        InstanceOrigin::Container {
            lookup: "guice".into()
        }
    );
    assert_eq!(resolved.origin.to_string(), "container:guice");
}

#[test]
fn failing_lookup_is_skipped() {
    let runtime = FakeRuntime::new();
    runtime.load(ClassBuilder::new(SERVICE).build());
    let on_heap = runtime.spawn(SERVICE);

    let mut resolver = InstanceResolver::new();
    resolver.register(Arc::new(FakeContainer::new("broken").failing("context closed")));

    let resolved = resolver
        .resolve(runtime.as_ref(), &shape(&runtime, SERVICE), false)
        .unwrap();
    assert_eq!(resolved.object, on_heap);
    assert_eq!(resolved.origin, InstanceOrigin::Heap);
}

struct BrokenProxy;

impl Unwrappable for BrokenProxy {
    fn target(&self) -> Result<ObjectRef, ContainerError> {
        Err(ContainerError::Unavailable("target destroyed".into()))
    }
}

#[test]
fn proxies_are_unwrapped_only_when_asked() {
    let runtime = FakeRuntime::new();
    runtime.load(ClassBuilder::new(SERVICE).build());
    let proxy = ObjectRef {
        id: 10,
        class_name: format!("{SERVICE}$$Proxy"),
    };
    let mut resolver = InstanceResolver::new();
    resolver.register(Arc::new(FakeContainer::new("spring").with(
        SERVICE,
        ContainerInstance::proxied(proxy.clone(), Arc::new(ProxyTarget(object(11)))),
    )));
    let class = shape(&runtime, SERVICE);

    let public_call = resolver.resolve(runtime.as_ref(), &class, false).unwrap();
    assert_eq!(public_call.object, proxy);

    let private_call = resolver.resolve(runtime.as_ref(), &class, true).unwrap();
    assert_eq!(private_call.object, object(11));

    let mut resolver = InstanceResolver::new();
    resolver.register(Arc::new(FakeContainer::new("spring").with(
        SERVICE,
        ContainerInstance::proxied(proxy.clone(), Arc::new(BrokenProxy)),
    )));
    let fallback = resolver.resolve(runtime.as_ref(), &class, true).unwrap();
    assert_eq!(fallback.object, proxy);
}

#[test]
fn heap_instances_are_used_as_found_for_private_calls() {
    let runtime = FakeRuntime::new();
    runtime.load(ClassBuilder::new(SERVICE).build());
    let on_heap = runtime.spawn(SERVICE);
    // A subclass proxy is a different class; the heap scan never picks it.
    runtime.load(ClassBuilder::new(&format!("{SERVICE}$$Proxy")).extends(SERVICE).build());
    runtime.spawn(&format!("{SERVICE}$$Proxy"));

    let resolved = InstanceResolver::new()
        .resolve(runtime.as_ref(), &shape(&runtime, SERVICE), true)
        .unwrap();
    assert_eq!(resolved.object, on_heap);
    assert_eq!(resolved.origin, InstanceOrigin::Heap);
}

#[test]
fn heap_prefers_exact_class_and_last_enumerated() {
    // "Last" means last in the runtime's enumeration order, which only
    // approximates recency. The fake enumerates in creation order.
    let runtime = FakeRuntime::new();
    runtime.load(ClassBuilder::new(SERVICE).build());
    runtime.spawn(SERVICE);
    let newest = runtime.spawn(SERVICE);

    let resolved = InstanceResolver::new()
        .resolve(runtime.as_ref(), &shape(&runtime, SERVICE), false)
        .unwrap();
    assert_eq!(resolved.object, newest);
    assert_eq!(runtime.constructed.load(Ordering::SeqCst), 0);
}

#[test]
fn construction_uses_first_constructor_with_zero_values_when_no_default() {
    let runtime = FakeRuntime::new();
    runtime.load(
        ClassBuilder::new(SERVICE)
            .constructor(access::PUBLIC, "(ILjava/lang/String;)V")
            .build(),
    );
    runtime.fail_heap_scans("heap walking disabled");

    let resolved = InstanceResolver::new()
        .resolve(runtime.as_ref(), &shape(&runtime, SERVICE), false)
        .unwrap();
    assert_eq!(resolved.origin, InstanceOrigin::Constructed);
    assert_eq!(resolved.object.class_name, SERVICE);
    assert_eq!(runtime.constructed.load(Ordering::SeqCst), 1);
}

#[test]
fn abstract_types_and_types_without_constructors_cannot_be_resolved() {
    let runtime = FakeRuntime::new();
    runtime.load(
        ClassBuilder::new(SERVICE)
            .access(access::PUBLIC | access::ABSTRACT)
            .build(),
    );
    let err = InstanceResolver::new()
        .resolve(runtime.as_ref(), &shape(&runtime, SERVICE), false)
        .unwrap_err();
    assert!(matches!(err, ResolveError::NoInstance { .. }), "{err:?}");

    let other = "com.example.Util";
    runtime.load(ClassBuilder::new(other).without_constructors().build());
    let err = InstanceResolver::new()
        .resolve(runtime.as_ref(), &shape(&runtime, other), false)
        .unwrap_err();
    match err {
        ResolveError::NoInstance { class_name, reason } => {
            assert_eq!(class_name, other);
            assert!(reason.contains("no constructor"), "{reason}");
        }
        other => panic!("expected NoInstance, got {other:?}"),
    }
}

use std::sync::atomic::Ordering;
use std::sync::Arc;

use hotwire_agent::{Agent, JavacCompiler};
use hotwire_classfile::access;
use hotwire_config::CompilerConfig;
use hotwire_proto::{
    ClearResultRequest, CompileOutcome, CompileRequest, GetResultRequest, HotSwapOutcome,
    HotSwapRequest, HotSwapStatus, InvocationResult, InvokeRequest, Packet, Severity, SourceUnit,
    TargetDescriptor, Value,
};

use crate::support::{
    greeter, greeter_script, greeter_source, Body, ClassBuilder, FakeRuntime, ScriptedJavac,
    GREETER,
};

const CALC: &str = "com.example.Calc";

fn agent(runtime: &Arc<FakeRuntime>) -> Agent {
    let compiler =
        JavacCompiler::with_launcher(CompilerConfig::default(), ScriptedJavac::new(greeter_script));
    Agent::new(runtime.clone(), Arc::new(compiler))
}

fn call(class_name: &str, method: &str, args: &[&str]) -> TargetDescriptor {
    TargetDescriptor {
        class_name: class_name.into(),
        method: method.into(),
        descriptor: None,
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}

async fn invoke(agent: &Agent, target: TargetDescriptor, offset: &str) -> InvocationResult {
    let reply = agent
        .dispatch(Packet::InvokeRequest(InvokeRequest {
            target,
            offset: offset.into(),
        }))
        .await;
    match reply {
        Packet::InvokeResponse(resp) => {
            assert_eq!(resp.offset, offset);
            resp.result
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

async fn hot_swap(agent: &Agent, source: String) -> HotSwapOutcome {
    let reply = agent
        .dispatch(Packet::HotSwapRequest(HotSwapRequest {
            units: vec![SourceUnit {
                class_name: GREETER.into(),
                source,
            }],
        }))
        .await;
    match reply {
        Packet::HotSwapResponse(resp) => resp.outcome,
        other => panic!("unexpected reply {other:?}"),
    }
}

fn returned_string(result: &InvocationResult) -> &str {
    match result {
        InvocationResult::Returned {
            value: Value::String(s),
            rendered,
        } => {
            assert_eq!(s, rendered);
            s
        }
        other => panic!("expected a string result, got {other:?}"),
    }
}

#[tokio::test]
async fn hot_swap_changes_behavior_of_existing_instance() {
    let runtime = FakeRuntime::new();
    runtime.load(greeter("Hello").build());
    let existing = runtime.spawn(GREETER);
    let agent = agent(&runtime);

    let before = invoke(&agent, call(GREETER, "greet", &[]), "before").await;
    assert_eq!(returned_string(&before), "Hello");

    match hot_swap(&agent, greeter_source("Hi")).await {
        HotSwapOutcome::Applied(results) => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].class_name, GREETER);
            assert_eq!(results[0].status, HotSwapStatus::Redefined);
        }
        other => panic!("hot swap failed: {other:?}"),
    }

    let after = invoke(&agent, call(GREETER, "greet", &[]), "after").await;
    assert_eq!(returned_string(&after), "Hi");

    // Same object before and after: nothing was constructed, nothing new on the heap.
    assert_eq!(runtime.constructed.load(Ordering::SeqCst), 0);
    assert_eq!(
        hotwire_agent::ManagedRuntime::instances_of(runtime.as_ref(), GREETER).unwrap(),
        vec![existing]
    );
    assert_eq!(runtime.redefine_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn syntax_error_reports_diagnostics_and_redefines_nothing() {
    let runtime = FakeRuntime::new();
    runtime.load(greeter("Hello").build());
    runtime.spawn(GREETER);
    let agent = agent(&runtime);

    let broken = greeter_source("Hi").replace("\";", "\"");
    match hot_swap(&agent, broken).await {
        HotSwapOutcome::CompileFailed {
            failure,
            diagnostics,
        } => {
            assert_eq!(failure.kind, "Syntax");
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].unit, GREETER);
            assert_eq!(diagnostics[0].line, Some(1));
            assert_eq!(diagnostics[0].severity, Severity::Error);
            assert!(diagnostics[0].message.contains("';' expected"), "{diagnostics:?}");
        }
        other => panic!("expected a compile failure, got {other:?}"),
    }
    assert_eq!(runtime.redefine_calls.load(Ordering::SeqCst), 0);

    let result = invoke(&agent, call(GREETER, "greet", &[]), "still-old").await;
    assert_eq!(returned_string(&result), "Hello");
}

#[tokio::test]
async fn compile_alone_does_not_touch_the_runtime() {
    let runtime = FakeRuntime::new();
    runtime.load(greeter("Hello").build());
    let agent = agent(&runtime);

    let reply = agent
        .dispatch(Packet::CompileRequest(CompileRequest {
            units: vec![SourceUnit {
                class_name: GREETER.into(),
                source: greeter_source("Hi"),
            }],
        }))
        .await;
    let Packet::CompileResponse(resp) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    let CompileOutcome::Compiled(units) = resp.outcome else {
        panic!("compile failed: {:?}", resp.outcome);
    };
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].class_name, GREETER);
    assert_eq!(&units[0].bytecode[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    assert_eq!(runtime.redefine_calls.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.definition(GREETER), Some(greeter("Hello").build()));
}

#[tokio::test]
async fn instance_is_constructed_once_when_none_exists() {
    let runtime = FakeRuntime::new();
    runtime.load(
        ClassBuilder::new(CALC)
            .method(access::PUBLIC, "answer", "()I", Body::ReturnsInt(42))
            .build(),
    );
    let agent = agent(&runtime);

    for offset in ["first", "second"] {
        let result = invoke(&agent, call(CALC, "answer", &[]), offset).await;
        assert_eq!(
            result,
            InvocationResult::Returned {
                value: Value::Int(42),
                rendered: "42".into(),
            }
        );
    }
    // The second call finds the first call's object on the heap.
    assert_eq!(runtime.constructed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn static_methods_need_no_instance() {
    let runtime = FakeRuntime::new();
    runtime.load(
        ClassBuilder::new(CALC)
            .without_constructors()
            .method(access::PUBLIC | access::STATIC, "version", "()I", Body::ReturnsInt(3))
            .build(),
    );
    let agent = agent(&runtime);

    let result = invoke(&agent, call(CALC, "version", &[]), "v").await;
    assert!(result.is_success(), "{result:?}");
    assert_eq!(runtime.constructed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn thrown_exception_is_cached_and_clearing_is_idempotent() {
    let runtime = FakeRuntime::new();
    runtime.load(
        ClassBuilder::new(CALC)
            .method(
                access::PUBLIC,
                "explode",
                "()V",
                Body::Throws {
                    exception: "java.lang.IllegalStateException".into(),
                    message: "boom".into(),
                },
            )
            .build(),
    );
    let agent = agent(&runtime);

    let result = invoke(&agent, call(CALC, "explode", &[]), "x1").await;
    let InvocationResult::Failed(failure) = &result else {
        panic!("expected a failure, got {result:?}");
    };
    assert_eq!(failure.kind, "java.lang.IllegalStateException");
    assert_eq!(failure.message, "boom");
    assert!(!failure.stack.is_empty());

    let get = |offset: &str| {
        Packet::GetResultRequest(GetResultRequest {
            offset: offset.into(),
        })
    };
    let clear = || {
        Packet::ClearResultRequest(ClearResultRequest {
            offsets: vec!["x1".into()],
        })
    };

    match agent.dispatch(get("x1")).await {
        Packet::GetResultResponse(resp) => assert_eq!(resp.result, Some(result.clone())),
        other => panic!("unexpected reply {other:?}"),
    }
    // Reading does not consume the entry.
    match agent.dispatch(get("x1")).await {
        Packet::GetResultResponse(resp) => assert_eq!(resp.result, Some(result.clone())),
        other => panic!("unexpected reply {other:?}"),
    }

    match agent.dispatch(clear()).await {
        Packet::ClearResultResponse(resp) => assert_eq!(resp.removed, vec!["x1".to_string()]),
        other => panic!("unexpected reply {other:?}"),
    }
    match agent.dispatch(clear()).await {
        Packet::ClearResultResponse(resp) => assert!(resp.removed.is_empty()),
        other => panic!("unexpected reply {other:?}"),
    }
    match agent.dispatch(get("x1")).await {
        Packet::GetResultResponse(resp) => assert_eq!(resp.result, None),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn arguments_are_decoded_against_the_descriptor() {
    let runtime = FakeRuntime::new();
    runtime.load(
        ClassBuilder::new(CALC)
            .method(access::PUBLIC | access::STATIC, "twice", "(I)I", Body::ReturnsInt(0))
            .method(
                access::PUBLIC | access::STATIC,
                "greet",
                "(Ljava/lang/String;)Ljava/lang/String;",
                Body::Returns(String::new()),
            )
            .build(),
    );
    runtime.native(CALC, "twice", |_, _, args| match args {
        [Value::Int(v)] => Ok(Value::Int(v * 2)),
        other => panic!("unexpected args {other:?}"),
    });
    runtime.native(CALC, "greet", |_, _, args| match args {
        [Value::String(name)] => Ok(Value::String(format!("hello {name}"))),
        [Value::Null] => Ok(Value::String("hello nobody".into())),
        other => panic!("unexpected args {other:?}"),
    });
    let agent = agent(&runtime);

    let result = invoke(&agent, call(CALC, "twice", &["21"]), "a").await;
    assert_eq!(
        result,
        InvocationResult::Returned {
            value: Value::Int(42),
            rendered: "42".into(),
        }
    );
    let result = invoke(&agent, call(CALC, "greet", &["\"ada\""]), "b").await;
    assert_eq!(returned_string(&result), "hello ada");
    let result = invoke(&agent, call(CALC, "greet", &["null"]), "c").await;
    assert_eq!(returned_string(&result), "hello nobody");

    for (args, offset) in [(&["\"x\""][..], "d"), (&["2147483648"][..], "e"), (&["1", "2"][..], "f")] {
        let result = invoke(&agent, call(CALC, "twice", args), offset).await;
        match result {
            InvocationResult::Failed(failure) => {
                assert!(
                    failure.kind == "ArgumentDecode" || failure.kind == "MethodNotFound",
                    "{failure:?}"
                )
            }
            other => panic!("expected a failure for {args:?}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn unknown_class_and_method_fail_without_panicking() {
    let runtime = FakeRuntime::new();
    runtime.load(greeter("Hello").build());
    let agent = agent(&runtime);

    let InvocationResult::Failed(failure) = invoke(&agent, call("com.example.Missing", "run", &[]), "m").await
    else {
        panic!("expected a failure");
    };
    assert_eq!(failure.kind, "ClassNotFound");

    let InvocationResult::Failed(failure) = invoke(&agent, call(GREETER, "wave", &[]), "w").await else {
        panic!("expected a failure");
    };
    assert_eq!(failure.kind, "MethodNotFound");
    assert_eq!(agent.cache().len(), 2);
}

#[tokio::test]
async fn panicking_target_becomes_a_cached_failure() {
    let runtime = FakeRuntime::new();
    runtime.load(
        ClassBuilder::new(CALC)
            .method(access::PUBLIC | access::STATIC, "crash", "()V", Body::Void)
            .build(),
    );
    runtime.native(CALC, "crash", |_, _, _| panic!("native crash"));
    let agent = agent(&runtime);

    let result = invoke(&agent, call(CALC, "crash", &[]), "p").await;
    match &result {
        InvocationResult::Failed(failure) => {
            assert_eq!(failure.kind, "Panic");
            assert!(failure.message.contains("native crash"));
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    assert_eq!(agent.cache().get("p"), Some(result));
}

//! Wires a bridge between a mock script runtime and a mock native runtime and
//! walks through a call, an event and a message in each direction.
//!
//! Usage: `gluedemo [config.json]`. Set `RUST_LOG=debug` to watch settlement.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;

use glueval::CanonicalValue;
use glueval::ScriptValue;

use gluerun::BridgeConfig;
use gluerun::Direction;
use gluerun::HostRuntime;
use gluerun::MethodDescriptor;
use gluerun::MethodRegistry;
use gluerun::ObserverHandle;
use gluerun::Rejection;
use gluerun::RuntimeBridgeContext;
use gluerun::mock_host::MockRuntime;

fn load_config() -> anyhow::Result<BridgeConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(BridgeConfig::default().with_call_timeout(Duration::from_secs(5)));
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    BridgeConfig::from_json(&text).with_context(|| format!("parsing {}", path))
}

fn registry(native: &Arc<MockRuntime>) -> anyhow::Result<MethodRegistry> {
    let native = native.clone();
    let add = MethodDescriptor::deferred("add", 2, move |args, responder| {
        let job = move || {
            let sum = args
                .iter()
                .map(|arg| arg.as_f64().ok_or_else(|| Rejection::new(format!("cannot add a {}", arg.type_name()))))
                .sum::<Result<f64, Rejection>>();
            responder.settle(sum.map(CanonicalValue::Number));
        };
        let _ = native.schedule(Box::new(job));
    });

    let platform = MethodDescriptor::sync("platform", 0, |_| {
        Ok(CanonicalValue::map([("os", "demo"), ("arch", std::env::consts::ARCH)]))
    });

    let registry = MethodRegistry::new().with(add)?.with(platform)?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let script = MockRuntime::script("script");
    let native = MockRuntime::native("native");
    let script_dyn: Arc<dyn HostRuntime> = script.clone();
    let native_dyn: Arc<dyn HostRuntime> = native.clone();

    let ctx = RuntimeBridgeContext::initialize(&script_dyn, &native_dyn, registry(&native)?, config)?;
    tracing::info!(methods = ?ctx.registry().identifiers(), "bridge up");

    // script -> native call
    let js = ctx.script_marshaler();
    let call = ctx.invoke_native(&js, "add", &[ScriptValue::Number(3.0), ScriptValue::Number(7.0)]);
    native.run_pending();
    let sum = call.settled_into(&js).await?;
    tracing::info!(?sum, "add(3, 7)");

    match ctx.invoke("mult", vec![3.into(), 7.into()]).settled().await {
        Ok(value) => tracing::warn!(%value, "mult unexpectedly resolved"),
        Err(e) => tracing::info!(kind = %e.kind(), error = %e, "mult rejected"),
    }

    let platform = ctx.invoke("platform", vec![]).settled().await?;
    tracing::info!(%platform, "platform");

    // native -> script event with nobody listening
    let delivered = ctx.emit_native(&ctx.json_marshaler(), "customEvent", &json!({"foo": 123}))?;
    tracing::info!(delivered, "customEvent published");

    // native -> script message, observer leaves after the first one
    let handle: Arc<OnceLock<ObserverHandle>> = Arc::new(OnceLock::new());
    let own = handle.clone();
    let observer = ctx.router().observe(Direction::ToScript, "SAMPLE_MESSAGE", move |message| {
        tracing::info!(payload = %message.payload, "SAMPLE_MESSAGE received");
        if let Some(handle) = own.get() {
            handle.unsubscribe();
        }
        Ok(())
    });
    let _ = handle.set(observer);

    let payload = CanonicalValue::map([("foo", "bar")]);
    ctx.post_across(Direction::ToScript, "SAMPLE_MESSAGE", payload.clone())?;
    ctx.post_across(Direction::ToScript, "SAMPLE_MESSAGE", payload)?;
    let ran = script.run_pending();
    tracing::info!(ran, observers = ctx.router().observer_count(Direction::ToScript, "SAMPLE_MESSAGE"), "script turn done");

    let report = ctx.teardown();
    tracing::info!(?report, "bridge down");
    Ok(())
}

/// Timing runs for key construction and scope resolution.
///
/// Plain `Instant` timing; run with `cargo bench --bench resolution_bench`.

extern crate cfml_runtime;

use cfml_runtime::runner::config::{ApplicationSettings, RuntimeConfig};
use cfml_runtime::runner::context::Context;
use cfml_runtime::runner::ds::function::{Arguments, Function, Param};
use cfml_runtime::runner::ds::key::Key;
use cfml_runtime::runner::ds::value::Value;
use cfml_runtime::runner::runtime::Runtime;
use std::time::{Duration, Instant};

fn time<F: FnMut()>(iterations: u32, mut f: F) -> Duration {
    let start = Instant::now();
    for _ in 0..iterations {
        f();
    }
    start.elapsed()
}

fn report(name: &str, iterations: u32, elapsed: Duration) {
    let per_op = elapsed.as_nanos() / u128::from(iterations.max(1));
    println!("{:<40} {:>12?} {:>10} ns/op", name, elapsed, per_op);
}

/// Calls nested closures `depth` deep and resolves `target` in the innermost.
fn nested_lookup(ctx: &Context<'_>, depth: usize, target: &Key) -> Value {
    if depth == 0 {
        return ctx
            .resolve(target, None)
            .map(|found| found.value)
            .unwrap_or(Value::Null);
    }
    let target = target.clone();
    let closure = ctx.bind_function(Function::closure(vec![Param::new("n")], move |inner| {
        Ok(nested_lookup(inner, depth - 1, &target))
    }));
    closure
        .invoke(ctx, Arguments::Positional(vec![Value::from(depth as i64)]))
        .unwrap_or(Value::Null)
}

fn main() {
    println!("=======================================================");
    println!("  cfml-runtime - Resolution Benchmarks");
    println!("=======================================================\n");

    let runtime = Runtime::new(RuntimeConfig::default());
    let server = runtime.server_context();
    let request = server.request();
    for i in 0..50 {
        let _ = request.set(&format!("var{}", i), i);
    }
    let hot = Key::of("VAR25");
    let missing = Key::of("notThere");

    report(
        "Key::of (ascii name)",
        100_000,
        time(100_000, || {
            let _ = Key::of("someVariableName");
        }),
    );
    report(
        "Key::of (numeric)",
        100_000,
        time(100_000, || {
            let _ = Key::of("42");
        }),
    );
    report(
        "resolve (request variables)",
        100_000,
        time(100_000, || {
            let _ = request.resolve(&hot, None);
        }),
    );
    report(
        "resolve (miss, default scope)",
        100_000,
        time(100_000, || {
            let scope = request.default_assignment_scope();
            let _ = request.resolve(&missing, Some(&scope));
        }),
    );
    report(
        "resolve through 8 nested closures",
        2_000,
        time(2_000, || {
            let _ = nested_lookup(&request, 8, &hot);
        }),
    );

    request
        .update_settings(ApplicationSettings::named("bench").with_sessions(true))
        .ok();
    let _ = request.set("application.var", 1);
    report(
        "resolve_path (application.var)",
        100_000,
        time(100_000, || {
            let _ = request.resolve_path("application.var");
        }),
    );

    runtime.shutdown();
}

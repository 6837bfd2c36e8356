extern crate cfml_runtime;

use cfml_runtime::runner::config::{ApplicationSettings, RuntimeConfig};
use cfml_runtime::runner::context::{Context, ContextType};
use cfml_runtime::runner::ds::class::BoxClass;
use cfml_runtime::runner::ds::error::RuntimeError;
use cfml_runtime::runner::ds::function::{Access, Arguments, Function, Param};
use cfml_runtime::runner::ds::key::Key;
use cfml_runtime::runner::ds::value::Value;
use cfml_runtime::runner::runtime::Runtime;
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default())
}

fn key(name: &str) -> Key {
    Key::of(name)
}

/// Resolves `name` and returns the owning scope's name.
fn owner(ctx: &Context<'_>, name: &str) -> String {
    ctx.resolve(&key(name), None).unwrap().scope.name().to_string()
}

// ── Request-level resolution ─────────────────────────────────────────

#[test]
fn test_assign_then_resolve_round_trip() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    let default = request.default_assignment_scope();

    let found = request.resolve(&key("x"), Some(&default)).unwrap();
    assert_eq!(found.value, Value::Null);
    request.assign(&found.scope, &key("x"), 10).unwrap();
    assert_eq!(request.resolve(&key("X"), None).unwrap().value, Value::Integer(10));
}

#[test]
fn test_default_scope_is_reported_but_not_written() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    let default = request.default_assignment_scope();

    request.resolve(&key("ghost"), Some(&default)).unwrap();
    assert!(!default.contains_key(&key("ghost")));
}

#[test]
fn test_missing_key_names_the_identifier() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();

    let err = request.resolve(&key("nowhere"), None).unwrap_err();
    assert!(err.is_key_not_found());
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_variables_shadow_request_scope() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();

    request.set("request.mode", "from-request").unwrap();
    assert_eq!(request.resolve_value("mode").unwrap(), Value::from("from-request"));
    assert_eq!(owner(&request, "mode"), "request");

    // an unqualified write would update the request scope binding
    request.set("variables.mode", "from-variables").unwrap();
    assert_eq!(request.resolve_value("mode").unwrap(), Value::from("from-variables"));
    assert_eq!(owner(&request, "mode"), "variables");
}

#[test]
fn test_scope_names_resolve_to_scopes() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();

    let found = request.resolve(&key("VARIABLES"), None).unwrap();
    assert!(found.is_scope);
    assert_eq!(found.scope.name(), &key("variables"));
    assert!(request.resolve(&key("server"), None).unwrap().is_scope);
}

#[test]
fn test_global_scopes_are_not_searched_unqualified() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request
        .update_settings(ApplicationSettings::named("unqualified").with_sessions(true))
        .unwrap();

    request.set("server.onlyOnServer", 1).unwrap();
    request.set("application.onlyOnApp", 2).unwrap();
    request.set("session.onlyOnSession", 3).unwrap();

    for name in ["onlyOnServer", "onlyOnApp", "onlyOnSession"] {
        assert!(request.resolve(&key(name), None).unwrap_err().is_key_not_found());
    }
    assert_eq!(request.resolve_value("session.onlyOnSession").unwrap(), Value::Integer(3));
    assert_eq!(request.resolve_value("server.onlyOnServer").unwrap(), Value::Integer(1));
}

#[test]
fn test_unreachable_scope_name_is_an_error() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request
        .update_settings(ApplicationSettings::named("shop"))
        .unwrap();

    // session management is off
    let err = request.set("session.cart", 3).unwrap_err();
    assert!(err.is_scope_not_found());
    assert!(request.resolve(&key("session"), None).unwrap_err().is_scope_not_found());
    assert!(request.default_assignment_scope().is_empty());

    // no application name at all
    let bare = server.request();
    assert!(bare.set("application", "plain").unwrap_err().is_scope_not_found());
    assert!(bare.resolve_value("application.x").unwrap_err().is_scope_not_found());
    assert!(bare.default_assignment_scope().is_empty());

    // `local` only exists inside a function
    assert!(bare.resolve(&key("local"), None).unwrap_err().is_scope_not_found());
}

#[test]
fn test_set_creates_intermediate_structs() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();

    request.set("user.address.city", "Oslo").unwrap();
    assert_eq!(request.resolve_value("USER.Address.city").unwrap(), Value::from("Oslo"));
    let user = request.resolve(&key("user"), None).unwrap();
    assert_eq!(user.scope.name(), &key("variables"));

    request.set("flat", 1).unwrap();
    assert!(request.set("flat.deeper", 2).is_err());
}

// ── Functions ────────────────────────────────────────────────────────

#[test]
fn test_function_locals_and_arguments() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request.set("shared", "outer").unwrap();

    let f = request
        .register_function(Function::udf(
            "describe",
            vec![Param::required("who")],
            |ctx| {
                ctx.set("greeting", "hi")?;
                let greeting = ctx.resolve_value("greeting")?;
                let who = ctx.resolve_value("who")?;
                let shared = ctx.resolve_value("shared")?;
                assert_eq!(ctx.resolve(&Key::of("greeting"), None)?.scope.name(), &Key::of("local"));
                Ok(Value::from(format!("{} {} {}", greeting, who, shared)))
            },
        ))
        .unwrap();

    let out = f
        .invoke(&request, Arguments::Positional(vec![Value::from("bob")]))
        .unwrap();
    assert_eq!(out, Value::from("hi bob outer"));
    // locals do not leak
    assert!(request.resolve(&key("greeting"), None).is_err());
    // the function was registered in variables
    assert_eq!(owner(&request, "describe"), "variables");
}

#[test]
fn test_invoke_function_by_name() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request
        .register_function(Function::udf(
            "double",
            vec![Param::required("n")],
            |ctx| {
                let n = ctx.resolve_value("arguments.n")?.as_i64().unwrap_or(0);
                Ok(Value::Integer(n * 2))
            },
        ))
        .unwrap();

    let result = request
        .invoke_function("double", Arguments::Positional(vec![Value::from(21)]))
        .unwrap();
    assert_eq!(result, Value::Integer(42));

    let err = request
        .invoke_function("double", Arguments::none())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::MissingArgument { .. }));

    request.set("notCallable", 1).unwrap();
    let err = request
        .invoke_function("notCallable", Arguments::none())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NotAFunction { .. }));
}

#[test]
fn test_function_source_is_pushed_on_template_stack() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request.push_template("/index.cfm");

    let f = request.bind_function(
        Function::udf("where", vec![], |ctx| {
            let here = ctx.find_closest_template().unwrap_or_default();
            let base = ctx.find_base_template().unwrap_or_default();
            let name = ctx.find_closest_function_name().map(|k| k.to_string());
            Ok(Value::from(format!(
                "{}|{}|{}",
                here.display(),
                base.display(),
                name.unwrap_or_default()
            )))
        })
        .with_source("/lib/helpers.cfm"),
    );
    let out = f.invoke(&request, Arguments::none()).unwrap();
    assert_eq!(out, Value::from("/lib/helpers.cfm|/index.cfm|where"));
    assert_eq!(request.find_closest_template(), Some(PathBuf::from("/index.cfm")));
}

// ── Classes, closures and lambdas ────────────────────────────────────

#[test]
fn test_lambda_cannot_see_class_variables_but_closure_can() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();

    let class = BoxClass::new("Widget");
    class.variables().put("secret", "class-only").unwrap();
    let class_ctx = request.class_context(class.clone());

    let method = class_ctx
        .register_function(Function::udf("probe", vec![], |ctx| {
            let closure = ctx.bind_function(Function::closure(vec![], |inner| {
                inner.resolve_value("secret")
            }));
            let lambda = ctx.bind_function(Function::lambda(vec![], |inner| {
                inner.resolve_value("secret")
            }));

            let seen_by_closure = closure.invoke(ctx, Arguments::none())?;
            let seen_by_lambda = lambda.invoke(ctx, Arguments::none());
            assert!(seen_by_lambda.unwrap_err().is_key_not_found());
            Ok(seen_by_closure)
        }))
        .unwrap();

    let result = method.invoke(&class_ctx, Arguments::none()).unwrap();
    assert_eq!(result, Value::from("class-only"));
}

#[test]
fn test_lambda_sees_only_local_and_arguments_unqualified() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request.set("request.token", "abc").unwrap();
    request.set("pageVar", 1).unwrap();

    let lambda = request.bind_function(Function::lambda(vec![], |ctx| {
        assert!(ctx.resolve(&Key::of("pageVar"), None).unwrap_err().is_key_not_found());
        assert!(ctx.resolve(&Key::of("token"), None).unwrap_err().is_key_not_found());
        assert!(ctx.resolve_value("variables.pageVar").unwrap_err().is_scope_not_found());
        ctx.resolve_value("request.token")
    }));
    assert_eq!(lambda.invoke(&request, Arguments::none()).unwrap(), Value::from("abc"));
}

#[test]
fn test_closure_captures_declaring_scopes() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request.set("pageVar", "page").unwrap();

    let outer = request.bind_function(Function::udf(
        "makeCounter",
        vec![Param::with_default("start", 5)],
        |ctx| {
            ctx.set("count", ctx.resolve_value("start")?)?;
            Ok(Value::Function(ctx.bind_function(Function::closure(vec![], |inner| {
                let count = inner.resolve_value("count")?.as_i64().unwrap_or(0);
                // writes land on the captured local scope
                let found = inner.resolve(&Key::of("count"), None)?;
                inner.assign(&found.scope, &found.key, count + 1)?;
                let page = inner.resolve_value("pageVar")?;
                Ok(Value::from(format!("{}:{}", page, count + 1)))
            }))))
        },
    ));

    let counter = outer.invoke(&request, Arguments::none()).unwrap();
    let counter = counter.as_function().unwrap().clone();

    // invoked from an unrelated template, the closure still sees its frame
    let other = request.template("/other.cfm");
    assert_eq!(counter.invoke(&other, Arguments::none()).unwrap(), Value::from("page:6"));
    assert_eq!(counter.invoke(&other, Arguments::none()).unwrap(), Value::from("page:7"));
    assert!(other.resolve(&key("count"), None).is_err());
}

#[test]
fn test_closure_qualified_variables_is_declaring_scope() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request.set("origin", "declaring").unwrap();

    let closure = request.bind_function(Function::closure(vec![], |ctx| {
        ctx.resolve_value("variables.origin")
    }));
    let page = request.template("/elsewhere.cfm");
    page.set("origin", "caller").unwrap();
    assert_eq!(closure.invoke(&page, Arguments::none()).unwrap(), Value::from("declaring"));
}

#[test]
fn test_class_methods_see_this_and_variables() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();

    let class = BoxClass::new("Account");
    class.variables().put("balance", 100).unwrap();
    let class_ctx = request.class_context(class.clone());
    class_ctx
        .register_function(Function::udf("helper", vec![], |_| Ok(Value::from("private")))
            .with_access(Access::Private))
        .unwrap();
    class_ctx
        .register_function(Function::udf("report", vec![], |ctx| {
            let balance = ctx.resolve_value("balance")?;
            let via_this = ctx.resolve_value("this.report")?.as_function().is_some();
            let helper = ctx.invoke_function("helper", Arguments::none())?;
            Ok(Value::from(format!("{}:{}:{}", balance, via_this, helper)))
        }))
        .unwrap();

    assert!(class.this().contains_key(&key("report")));
    assert!(!class.this().contains_key(&key("helper")));

    let out = request
        .invoke_function("doesNotExist", Arguments::none())
        .unwrap_err();
    assert!(out.is_key_not_found());

    let report = class.this().get(&key("report")).unwrap();
    let result = report
        .as_function()
        .unwrap()
        .invoke(&request, Arguments::none())
        .unwrap();
    assert_eq!(result, Value::from("100:true:private"));
}

#[test]
fn test_class_method_does_not_see_caller_variables() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    request.set("callerOnly", 1).unwrap();

    let class = BoxClass::new("Isolated");
    let method = class
        .define_method(Function::udf("peek", vec![], |ctx| {
            Ok(Value::Boolean(ctx.resolve(&Key::of("callerOnly"), None).is_ok()))
        }))
        .unwrap();
    assert_eq!(method.invoke(&request, Arguments::none()).unwrap(), Value::Boolean(false));
}

// ── Chain inspection ─────────────────────────────────────────────────

#[test]
fn test_parent_of_type_and_visible_scopes() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    let page = request.template("/page.cfm");

    assert_eq!(
        page.get_parent_of_type(ContextType::Request).map(|c| c.context_type()),
        Some(ContextType::Request)
    );
    assert!(page.get_parent_of_type(ContextType::Server).is_some());
    assert!(page.get_parent_of_type(ContextType::Application).is_none());

    let names: Vec<String> = page
        .visible_scopes()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["variables", "request", "server"]);
}

#[test]
fn test_default_assignment_scopes() {
    let rt = runtime();
    let server = rt.server_context();
    let request = server.request();
    assert_eq!(request.default_assignment_scope().name(), &key("variables"));

    let f = request.bind_function(Function::udf("f", vec![], |ctx| {
        Ok(Value::from(ctx.default_assignment_scope().name().to_string()))
    }));
    assert_eq!(f.invoke(&request, Arguments::none()).unwrap(), Value::from("local"));
}

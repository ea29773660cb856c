use anyhow::Result;
use bytes::Bytes;
use framerpc_consumer::{create_consumer, Consumer, ConsumerConfig};
use framerpc_core::{ApiNode, ApiObject, RpcError, WireValue};
use framerpc_provider::{create_provider, Provider, ProviderConfig};
use framerpc_transport::pair;
use tracing_subscriber::EnvFilter;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "framerpc_core=trace,framerpc_transport=trace,framerpc_provider=trace,framerpc_consumer=trace,debug",
            )
        }))
        .try_init();
}

fn arg_f64(args: &[WireValue], index: usize) -> Result<f64, RpcError> {
    args.get(index)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| RpcError::app(format!("argument {} must be a number", index)))
}

/// The demo API used across the end-to-end scenarios: scalars, failing
/// and nested-result functions, a closure factory, a cyclic subtree, and
/// every pass-through built-in.
pub fn demo_api() -> ApiNode {
    let root = ApiObject::new();
    root.insert("a", 1i64);

    root.insert(
        "test",
        ApiNode::func(|args: Vec<WireValue>| async move {
            Ok(ApiNode::from(arg_f64(&args, 0)? + 1.0))
        }),
    );

    root.insert(
        "fail",
        ApiNode::func(|_| async { Err(RpcError::app("boom")) }),
    );

    root.insert(
        "test_nested",
        ApiNode::func(|args: Vec<WireValue>| async move {
            let p = arg_f64(&args, 0)?;
            let result = ApiObject::new();
            result.insert("a", p + 1000.0);
            result.insert(
                "test",
                ApiNode::func(|args: Vec<WireValue>| async move {
                    Ok(ApiNode::from(arg_f64(&args, 0)? + 1000.0))
                }),
            );
            Ok(ApiNode::Object(result))
        }),
    );

    root.insert(
        "mk_adder",
        ApiNode::func(|args: Vec<WireValue>| async move {
            let x = arg_f64(&args, 0)?;
            Ok(ApiNode::func(move |args: Vec<WireValue>| async move {
                Ok(ApiNode::from(x + arg_f64(&args, 0)?))
            }))
        }),
    );

    let nested = ApiObject::new();
    nested.insert("val", 2i64);
    let cycle = ApiObject::new();
    cycle.insert("a", 1i64);
    cycle.insert("nested", nested.clone());
    cycle.insert("selfref", cycle.clone());
    nested.insert("parent", cycle.clone());
    let cycle_for_fn = cycle.clone();
    nested.insert(
        "fn",
        ApiNode::func(move |args: Vec<WireValue>| {
            let cycle = cycle_for_fn.clone();
            async move {
                let a = cycle
                    .get("a")
                    .and_then(|node| match node {
                        ApiNode::Value(v) => v.as_f64(),
                        _ => None,
                    })
                    .unwrap_or(0.0);
                Ok(ApiNode::from(arg_f64(&args, 0)? + a))
            }
        }),
    );
    root.insert("cycle", cycle);

    let builtins = ApiObject::new();
    builtins.insert("d", WireValue::Date(1_700_000_000_000.0));
    builtins.insert(
        "r",
        WireValue::Regex {
            pattern: "^a+$".to_string(),
            flags: "i".to_string(),
        },
    );
    builtins.insert(
        "m",
        WireValue::Map(vec![(WireValue::from("k"), WireValue::from(2))]),
    );
    builtins.insert(
        "s",
        WireValue::Set(vec![WireValue::from(1), WireValue::from(2)]),
    );
    builtins.insert("ta", WireValue::Bytes(Bytes::from(vec![1u8, 2, 3])));
    root.insert("builtins", builtins);

    ApiNode::Object(root)
}

/// Wire both peers over a fresh paired channel with default options.
pub async fn connect(name: &str, api: ApiNode) -> Result<(Provider, Consumer)> {
    connect_with(
        name,
        api,
        ProviderConfig::new(name),
        ConsumerConfig::default(),
    )
    .await
}

/// Wire both peers with explicit options.
pub async fn connect_with(
    name: &str,
    api: ApiNode,
    provider_config: ProviderConfig,
    consumer_config: ConsumerConfig,
) -> Result<(Provider, Consumer)> {
    let (provider_end, consumer_end) = pair("https://provider.example", "https://consumer.example");
    let provider = create_provider(api, provider_end, provider_config);
    let consumer = create_consumer(consumer_end, name, consumer_config).await?;
    Ok((provider, consumer))
}

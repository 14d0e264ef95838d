//! Basic example of running a restricted script.
//!
//! Run with: cargo run --example basic_execution
//!
//! Note: Requires rustpython.wasm to be present in assets/

use asterr::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_or_default("config.json");
    let config = SandboxConfig::builder()
        .interpreter_path("assets/rustpython.wasm")
        .settings(&settings)
        .build();

    println!("Creating engine with config: {:?}", config);
    let engine = RestrictedEngine::new(config)?;

    // Parameters are bound as plain names
    println!("\n=== Test 1: Addition ===");
    let request = engine.request("asterr_result = a + b").param("a", 2)?.param("b", 3)?;
    let outcome = engine.run(request).await;
    println!("result: {:?}", outcome.result);
    println!("reached: {:?}", outcome.reached);
    println!("duration: {:?}", outcome.metadata.duration);

    // Refused before anything runs
    println!("\n=== Test 2: Disallowed import ===");
    let outcome = engine.run(engine.request("import os\nasterr_result = os.getcwd()")).await;
    match outcome.error {
        Some(e) => println!("error: {}", e),
        None => println!("unexpectedly succeeded"),
    }

    // Runtime errors are captured, not propagated
    println!("\n=== Test 3: Python error ===");
    let outcome = engine.run(engine.request("raise ValueError('test error')")).await;
    if let Some(e) = outcome.error {
        println!("kind: {:?}", e.kind());
        println!("error: {}", e);
    }

    // Printed output is kept apart from the result
    println!("\n=== Test 4: Output capture ===");
    let code = r#"
for i in range(3):
    print(f"Count: {i}")
asterr_result = i
"#;
    let outcome = engine.run(engine.request(code)).await;
    println!("stdout:\n{}", outcome.stdout);
    println!("result: {:?}", outcome.result);

    Ok(())
}

use openworkers_runtime_xhr::{Config, ProgressEvent, RequestBody, Runtime, run_event_loop};
use std::rc::Rc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize logger
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: openworkers-runtime-xhr <url> [body]");
        std::process::exit(2);
    };
    let body = args.next();

    let transport = match Config::from_env().transport() {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    // Create runtime and event loop
    let (mut runtime, scheduler_rx, callback_tx) = Runtime::new(transport);

    log::info!(
        "XMLHttpRequest bridge (proxy: {})",
        runtime
            .transport()
            .proxy()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    // Spawn the background event loop
    let event_loop_handle = tokio::spawn(async move {
        run_event_loop(scheduler_rx, callback_tx).await;
    });

    let xhr = runtime.xml_http_request();
    let print = |target: &'static str| {
        Rc::new(move |event: &ProgressEvent| {
            println!("[{}] {}", target, event.to_json());
        })
    };

    xhr.upload().set_onprogress(Some(print("upload")));
    xhr.upload().set_onload(Some(print("upload")));
    xhr.set_onreadystatechange(Some(print("xhr")));
    xhr.set_onprogress(Some(print("xhr")));
    xhr.set_onload(Some(print("xhr")));
    xhr.set_onerror(Some(print("xhr")));
    xhr.set_ontimeout(Some(print("xhr")));
    xhr.set_timeout(30_000);

    match body {
        Some(body) => {
            xhr.open("POST", &url);
            xhr.send(RequestBody::Text(body));
        }
        None => {
            xhr.open("GET", &url);
            xhr.send(RequestBody::Absent);
        }
    }

    runtime.run_until_idle().await;

    println!("status: {} {}", xhr.status(), xhr.status_text());
    print!("{}", xhr.get_all_response_headers());
    println!();
    println!("{}", xhr.response_text());

    // Cleanup: runtime will be dropped, sending shutdown message
    drop(runtime);

    // Wait for event loop to finish
    let _ = tokio::time::timeout(Duration::from_secs(1), event_loop_handle).await;
}

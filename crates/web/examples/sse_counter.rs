//! Counter stream: three timed events, a completion event, then close.
//!
//! Try it with `curl -N http://127.0.0.1:8080/events`.

use arbor_web::SseEvent;
use arbor_web::router::Router;
use arbor_web::server::{Server, init_default_tracing};
use http::Method;
use std::time::Duration;

#[tokio::main]
async fn main() {
    init_default_tracing();

    let router = Router::builder()
        .stream_with_loop(Method::GET, "/events", |writer, handle| async move {
            for i in 0..3u32 {
                handle.delay(Duration::from_millis(1000)).await;
                if handle.is_cancelled() {
                    break;
                }
                let event = SseEvent::data(i.to_string()).name("counter").id(i.to_string());
                if writer.send_event(event).is_err() {
                    // peer went away, nothing left to do
                    return;
                }
            }

            let _ = writer.send_event(SseEvent::data("Counter completed").name("done").id("final"));
            writer.close().await;
        })
        .build()
        .unwrap();

    Server::builder().router(router).bind("127.0.0.1", 8080).build().unwrap().start().await.unwrap();
}

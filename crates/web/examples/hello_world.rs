use arbor_web::handler_fn;
use arbor_web::middleware::middleware_fn;
use arbor_web::router::Router;
use arbor_web::server::{Server, init_default_tracing};
use http::StatusCode;

#[tokio::main]
async fn main() {
    init_default_tracing();

    let router = Router::builder()
        .get("/", handler_fn(|event| Box::pin(async move { event.send_text("Hello, World!").map_err(Into::into) })))
        .get(
            "/users/:id",
            handler_fn(|event| {
                Box::pin(async move {
                    let id = event.param("id").unwrap_or_default().to_owned();
                    event.send_json(&serde_json::json!({ "id": id })).map_err(Into::into)
                })
            }),
        )
        .get(
            "/old",
            handler_fn(|event| Box::pin(async move { event.redirect("/", StatusCode::MOVED_PERMANENTLY).map_err(Into::into) })),
        )
        .build()
        .unwrap();

    Server::builder()
        .router(router)
        .middleware(middleware_fn(|event, next| {
            Box::pin(async move {
                event.set_header("x-served-by", "arbor")?;
                next.run(event).await
            })
        }))
        .bind("127.0.0.1", 8080)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
}

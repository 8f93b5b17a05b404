#[tokio::main]
async fn main() {
    let code = fanout::app::startup::startup().await;
    std::process::exit(code);
}

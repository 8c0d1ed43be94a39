#[tokio::main]
async fn main() {
    if let Err(error) = blastwarp_api::run().await {
        eprintln!("fatal: {error}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    let code = pti_extcap_lib::run().await;
    std::process::exit(code)
}

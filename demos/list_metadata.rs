use std::error::Error;

use ksql_client::client::LOCAL_KSQL_SERVER;
use ksql_client::KsqlClient;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = KsqlClient::new(LOCAL_KSQL_SERVER)?;

        println!("server: {}", client.info().await?);
        for stream in client.list_streams().await? {
            println!("stream: {stream}");
        }
        for table in client.list_tables().await? {
            println!("table: {table}");
        }
        for topic in client.list_topics().await? {
            println!("topic: {topic}");
        }
        for query in client.list_queries().await? {
            println!("query: {query}");
        }

        Ok::<(), Box<dyn Error>>(())
    })
}

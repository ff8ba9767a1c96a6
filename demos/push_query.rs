use std::error::Error;

use ksql_client::client::LOCAL_KSQL_SERVER;
use ksql_client::{KsqlClient, QueryEvent, QueryRequest};

const MAX_ROWS: usize = 10;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = KsqlClient::new(LOCAL_KSQL_SERVER)?;
        let request =
            QueryRequest::new("SELECT * FROM PAGEVIEWS EMIT CHANGES;").with_offset_reset(true);
        let mut subscription = client.subscribe(&request).await?;

        let mut query_id = None;
        let mut rows = 0;
        while let Some(event) = subscription.recv().await {
            match event {
                QueryEvent::Header(header) => {
                    println!("columns={:?}", header.column_names);
                    query_id = header.query_id;
                }
                QueryEvent::Row(row) => {
                    println!("row={row:?}");
                    rows += 1;
                    if rows == MAX_ROWS {
                        break;
                    }
                }
                QueryEvent::Error { status, body } => {
                    eprintln!("query failed status={status} body={body}");
                    break;
                }
            }
        }

        subscription.cancel();
        if let Some(query_id) = query_id {
            client.close_query(&query_id).await;
        }

        Ok::<(), Box<dyn Error>>(())
    })
}

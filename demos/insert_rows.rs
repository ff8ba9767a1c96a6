use std::error::Error;

use ksql_client::client::LOCAL_KSQL_SERVER;
use ksql_client::{KsqlClient, QueryCallbacks};
use serde_json::json;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = KsqlClient::new(LOCAL_KSQL_SERVER)?;

        client
            .execute_statement(
                "CREATE STREAM IF NOT EXISTS PAGEVIEWS (USER_ID VARCHAR, PAGE VARCHAR) \
                 WITH (KAFKA_TOPIC='pageviews', VALUE_FORMAT='JSON', PARTITIONS=1);",
            )
            .await?;

        let acks = client
            .insert_into_stream(
                "PAGEVIEWS",
                &[
                    json!({"USER_ID": "u1", "PAGE": "/home"}),
                    json!({"USER_ID": "u2", "PAGE": "/docs"}),
                ],
            )
            .await?;
        println!("acks={acks:?}");

        let table = client
            .run_query_to_table("SELECT * FROM PAGEVIEWS LIMIT 2;", true)
            .await?;
        for record in table.records() {
            println!("{}", serde_json::Value::Object(record));
        }

        client
            .run_query(
                "SELECT * FROM PAGEVIEWS LIMIT 2;",
                true,
                QueryCallbacks::new()
                    .on_init(|header| println!("columns={:?}", header.column_names))
                    .on_row(|row| println!("row={row:?}"))
                    .on_error(|status, body| eprintln!("error status={status} body={body}"))
                    .on_close(|| println!("closed")),
            )
            .await?;

        Ok::<(), Box<dyn Error>>(())
    })
}

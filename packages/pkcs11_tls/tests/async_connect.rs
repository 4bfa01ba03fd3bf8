mod common;

use common::{ec_token, spawn_echo_server, CA_PEM, IO_TIMEOUT};
use cryypt_pkcs11_tls::{NetworkCredentials, TlsConnector, TlsTransportError};

#[tokio::test]
async fn connect_async_establishes_a_session() {
    let token = ec_token();
    let server = spawn_echo_server(Vec::new());
    let connector = TlsConnector::new(token.clone());

    let mut connection = connector
        .connect_async(
            "localhost".to_string(),
            server.port,
            NetworkCredentials::new(CA_PEM).into_owned(),
            IO_TIMEOUT,
            IO_TIMEOUT,
        )
        .await
        .unwrap();

    let echoed = tokio::task::spawn_blocking(move || {
        common::send_all(&mut connection, b"async");
        let echoed = common::recv_exact(&mut connection, 5);
        connection.disconnect();
        echoed
    })
    .await
    .unwrap();

    assert_eq!(echoed, b"async".to_vec());
    assert_eq!(token.open_session_count(), 0);
    server.join();
}

#[tokio::test]
async fn connect_async_reports_setup_errors() {
    let connector = TlsConnector::new(ec_token());
    let result = connector
        .connect_async(
            String::new(),
            443,
            NetworkCredentials::new(CA_PEM),
            IO_TIMEOUT,
            IO_TIMEOUT,
        )
        .await;
    assert!(matches!(result, Err(TlsTransportError::InvalidParameter(_))));
}

//! End-to-end acquisition runs: input file to PDFs on disk plus the
//! download report, against a mock publisher, Crossref and Unpaywall.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sift_core::{AcquisitionOptions, HttpClient, RetryPolicy, acquire_file};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

const PDF: &[u8] = b"%PDF-1.5\n%%EOF\n";

struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    fail_count: usize,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.request_count.fetch_add(1, Ordering::SeqCst) < self.fail_count {
            ResponseTemplate::new(503)
        } else {
            pdf_response()
        }
    }
}

fn pdf_response() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/pdf")
        .set_body_bytes(PDF)
}

fn options(server: &MockServer, dir: &TempDir) -> AcquisitionOptions {
    AcquisitionOptions {
        output_dir: Some(dir.path().join("pdfs")),
        retry_policy: RetryPolicy::from_max_retries(3)
            .with_delays(Duration::from_millis(1), Duration::from_millis(10)),
        mailto: "lab@example.org".to_string(),
        crossref_base_url: Some(server.uri()),
        unpaywall_base_url: Some(server.uri()),
        doi_resolver: Some(format!("{}/", server.uri())),
        ..AcquisitionOptions::default()
    }
}

/// Reads a report back as (headers, rows).
fn read_report(path: &std::path::Path, delimiter: u8) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .unwrap();
    let headers = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (headers, rows)
}

#[tokio::test]
async fn test_tsv_table_search_retry_and_fallback() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };

    // Row 1: aggregator URL, DOI found through Crossref, PDF behind the DOI.
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("rows", "1"))
        .and(query_param("mailto", "lab@example.org"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "message": {"items": [{"DOI": "10.5555/grass", "score": 88.0}]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/10.5555/grass"))
        .respond_with(pdf_response())
        .mount(&server)
        .await;

    // Row 2: transient 503s, then success.
    let flaky_count = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/files/flaky.pdf"))
        .respond_with(FlakyResponder {
            request_count: Arc::clone(&flaky_count),
            fail_count: 2,
        })
        .mount(&server)
        .await;

    // Row 3: permanent 404, Unpaywall has no copy.
    Mock::given(method("GET"))
        .and(path("/files/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/10.1234/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "is_oa": false,
            "best_oa_location": null,
            "oa_locations": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("papers.tsv");
    let uri = server.uri();
    std::fs::write(
        &input,
        format!(
            "Title\tAuthors\tYear\tURL\tDOI\n\
             Grassland restoration outcomes\tLee, K.\t2019\thttps://www.researchgate.net/publication/1\t\n\
             Flaky server paper\tNg, A.\t2020\t{uri}/files/flaky.pdf\t\n\
             Missing paper\tOkafor, C.\t2018\t{uri}/files/missing.pdf\t10.1234/abc\n"
        ),
    )
    .unwrap();

    let summary = acquire_file(&input, &options(&server, &dir), &HttpClient::new().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.report_path, dir.path().join("papers_download.tsv"));
    assert_eq!(flaky_count.load(Ordering::SeqCst), 3);

    let pdfs = dir.path().join("pdfs");
    assert_eq!(
        std::fs::read(pdfs.join("2019_Lee_Grassland_restoration_outcomes.pdf")).unwrap(),
        PDF
    );
    assert!(pdfs.join("2020_Ng_Flaky_server_paper.pdf").exists());
    assert!(!pdfs.join("2018_Okafor_Missing_paper.pdf").exists());

    let (headers, rows) = read_report(&summary.report_path, b'\t');
    assert_eq!(
        headers,
        ["Title", "Authors", "Year", "URL", "DOI", "downloaded", "error_reason", "filename"]
    );
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][5], "true");
    assert_eq!(rows[0][7], "2019_Lee_Grassland_restoration_outcomes.pdf");
    assert_eq!(rows[1][5], "true");
    assert_eq!(rows[1][6], "");
    assert_eq!(rows[2][0], "Missing paper");
    assert_eq!(rows[2][5], "false");
    assert!(rows[2][6].starts_with("Download failed: HTTP 404"), "{}", rows[2][6]);
    assert!(rows[2][6].contains("no open-access copy for 10.1234/abc"), "{}", rows[2][6]);
    assert_eq!(rows[2][7], "");
}

#[tokio::test]
async fn test_url_list_duplicate_names_get_suffixes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(pdf_response())
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("urls.txt");
    let uri = server.uri();
    std::fs::write(
        &input,
        format!("{uri}/a/paper.pdf\n\n# mirror\n{uri}/b/paper.pdf\n"),
    )
    .unwrap();

    let summary = acquire_file(&input, &options(&server, &dir), &HttpClient::new().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.downloaded, 2);

    let (headers, rows) = read_report(&summary.report_path, b',');
    assert_eq!(headers, ["url", "downloaded", "error_reason", "filename"]);
    assert_eq!(rows[0][0], format!("{uri}/a/paper.pdf"));
    assert_eq!(rows[0][3], "paper.pdf");
    assert_eq!(rows[1][3], "paper_1.pdf");
    assert!(dir.path().join("pdfs").join("paper_1.pdf").exists());
}

#[tokio::test]
async fn test_table_without_locator_columns_fails_fast() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("papers.csv");
    std::fs::write(&input, "Title,Authors\nSoil,Smith\n").unwrap();

    let err = acquire_file(&input, &AcquisitionOptions::default(), &HttpClient::new().unwrap())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no URL or DOI column found"), "{err}");
}

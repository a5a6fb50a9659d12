use flate2::read::GzDecoder;
use gzip_response::{GzipConfig, GzipHandler, Level, ResponseRecorder};
use http::{Request, StatusCode, header};
use proptest::{collection::vec, prelude::any, proptest};
use std::io::Read;

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

proptest! {
    #[test]
    fn gzip_round_trip(
        ref chunks in vec(vec(any::<u8>(), 0..256), 0..16),
        level in -1..=9i32,
    ) {
        let handler = GzipHandler::new(GzipConfig::new(Level::new(level).unwrap()));
        let req = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();

        let mut recorder = ResponseRecorder::new();
        handler
            .serve(&req, &mut recorder, |w, _| {
                w.headers_mut()
                    .insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());
                w.write_header(StatusCode::OK);
                for chunk in chunks {
                    w.write(chunk).unwrap();
                }
            })
            .unwrap();

        assert_eq!(recorder.committed_headers()[header::CONTENT_ENCODING], "gzip");
        assert_eq!(gunzip(recorder.body()), chunks.concat());
    }

    #[test]
    fn excluded_types_pass_through(ref chunks in vec(vec(any::<u8>(), 0..256), 1..16)) {
        let handler = GzipHandler::new(GzipConfig::default().exclude_content_type("image/png"));
        let req = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();

        let mut recorder = ResponseRecorder::new();
        handler
            .serve(&req, &mut recorder, |w, _| {
                w.headers_mut()
                    .insert(header::CONTENT_TYPE, "image/png".parse().unwrap());
                for chunk in chunks {
                    w.write(chunk).unwrap();
                }
            })
            .unwrap();

        assert!(recorder.committed_headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(recorder.body(), &chunks.concat()[..]);
    }
}

// Fixed-layout certificate document.
//
// Every overlay field is bound to a named region with absolute coordinates on
// a fixed A4 landscape page. Fonts are the built-in Helvetica pair with
// WinAnsi encoding and the standard AFM widths, so centering and
// shrink-to-fit are decided here, in points, and no viewer's font
// substitution or reflow can move a field. Streams are written uncompressed:
// the same certificate always renders to the same bytes.

use chrono::{DateTime, Utc};
use qrcode::{Color, QrCode};
use std::io::Write as _;

use crate::models::Certificate;

pub struct RenderConfig {
    pub institute_name: String,
    pub frontend_base_url: String,
    /// Raw bytes of the background template image (JPEG or PNG). `None` or
    /// undecodable bytes fall back to a plain background.
    pub template: Option<Vec<u8>>,
}

const PAGE_W: f64 = 841.89;
const PAGE_H: f64 = 595.28;

/// A named horizontal band: `x`/`w` bound the field, `y` is the baseline.
#[derive(Clone, Copy)]
struct Region {
    x: f64,
    y: f64,
    w: f64,
}

const FULL: f64 = PAGE_W - 240.0;

const INSTITUTE: Region = Region { x: 120.0, y: 512.0, w: FULL };
const HEADING: Region = Region { x: 120.0, y: 452.0, w: FULL };
const PRESENTED: Region = Region { x: 120.0, y: 372.0, w: FULL };
const STUDENT_NAME: Region = Region { x: 120.0, y: 322.0, w: FULL };
const GUARDIAN: Region = Region { x: 120.0, y: 294.0, w: FULL };
const FOR_COURSE: Region = Region { x: 120.0, y: 262.0, w: FULL };
const COURSE_TITLE: Region = Region { x: 120.0, y: 232.0, w: FULL };
const GRADE: Region = Region { x: 120.0, y: 200.0, w: FULL };
const STUDENT_ID: Region = Region { x: 60.0, y: 112.0, w: 320.0 };
const CERT_ID: Region = Region { x: 60.0, y: 92.0, w: 320.0 };
const ISSUE_DATE: Region = Region { x: 60.0, y: 72.0, w: 320.0 };

const QR_X: f64 = 690.0;
const QR_Y: f64 = 64.0;
const QR_SIZE: f64 = 110.0;
const QR_CAPTION: Region = Region { x: 690.0, y: 52.0, w: 110.0 };

const INK: &str = "0.13 0.13 0.13 rg";

/// Helvetica AFM widths for WinAnsi 32..=126, in 1/1000 em.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

/// Render the certificate to a complete PDF byte stream. Infallible:
/// template and QR problems degrade the page, never abort it.
pub fn render(cert: &Certificate, cfg: &RenderConfig) -> Vec<u8> {
    let template = cfg.template.as_deref().and_then(decode_template);
    let mut content = Vec::new();

    match &template {
        Some(_) => {
            let _ = write!(
                content,
                "q {} 0 0 {} 0 0 cm /Im0 Do Q\n",
                fmt2(PAGE_W),
                fmt2(PAGE_H)
            );
        }
        None => draw_plain_background(&mut content),
    }

    draw_centered(&mut content, "/F2", 20.0, INSTITUTE, &cfg.institute_name);
    draw_centered(&mut content, "/F2", 34.0, STUDENT_NAME, &cert.student_name);
    if let Some(guardian) = &cert.guardian_name {
        draw_centered(&mut content, "/F1", 13.0, GUARDIAN, &format!("Guardian: {guardian}"));
    }
    draw_centered(&mut content, "/F1", 18.0, COURSE_TITLE, &cert.course_title);
    if let Some(grade) = &cert.grade {
        draw_centered(&mut content, "/F1", 14.0, GRADE, &format!("Grade: {grade}"));
    }
    draw_left(&mut content, "/F1", 11.0, STUDENT_ID, &format!("Student ID: {}", cert.custom_student_id));
    draw_left(&mut content, "/F1", 10.0, CERT_ID, &format!("Certificate No. {}", cert.certificate_id));
    draw_left(
        &mut content,
        "/F1",
        11.0,
        ISSUE_DATE,
        &format!("Issued on {}", cert.issued_at.format("%d %B %Y")),
    );

    let verify_url = format!(
        "{}/verify-certificate/{}",
        cfg.frontend_base_url.trim_end_matches('/'),
        cert.certificate_id
    );
    if draw_qr(&mut content, &verify_url) {
        draw_centered(&mut content, "/F1", 8.0, QR_CAPTION, "Scan to verify");
    }

    assemble(cert, content, template)
}

fn draw_plain_background(content: &mut Vec<u8>) {
    let _ = write!(content, "1 1 1 rg 0 0 {} {} re f\n", fmt2(PAGE_W), fmt2(PAGE_H));
    let _ = write!(
        content,
        "0.24 0.33 0.53 RG 3 w 24 24 {} {} re S\n",
        fmt2(PAGE_W - 48.0),
        fmt2(PAGE_H - 48.0)
    );
    draw_centered(content, "/F2", 36.0, HEADING, "CERTIFICATE OF COMPLETION");
    draw_centered(content, "/F1", 13.0, PRESENTED, "This certificate is proudly presented to");
    draw_centered(content, "/F1", 13.0, FOR_COURSE, "for completing the course");
}

// --- text placement ---

fn draw_left(content: &mut Vec<u8>, font: &str, size: f64, region: Region, text: &str) {
    let size = fit_size(text, size, region.w);
    show_text(content, font, size, region.x, region.y, text);
}

fn draw_centered(content: &mut Vec<u8>, font: &str, size: f64, region: Region, text: &str) {
    let size = fit_size(text, size, region.w);
    let x = region.x + (region.w - text_width(text, size)).max(0.0) / 2.0;
    show_text(content, font, size, x, region.y, text);
}

fn show_text(content: &mut Vec<u8>, font: &str, size: f64, x: f64, y: f64, text: &str) {
    let _ = write!(
        content,
        "BT {} {} {} Tf {} {} Td (",
        INK,
        font,
        fmt2(size),
        fmt2(x),
        fmt2(y)
    );
    content.extend_from_slice(&escape_literal(&encode_winansi(text)));
    content.extend_from_slice(b") Tj ET\n");
}

/// Width of `text` at `size` points, from the AFM table. Bytes outside the
/// table (the Latin-1 range) use the Helvetica lowercase default of 556.
fn text_width(text: &str, size: f64) -> f64 {
    let milli: u32 = encode_winansi(text)
        .iter()
        .map(|&b| match b {
            0x20..=0x7e => u32::from(HELVETICA_WIDTHS[usize::from(b) - 0x20]),
            _ => 556,
        })
        .sum();
    f64::from(milli) * size / 1000.0
}

/// Shrink oversized values until they fit their region, with a legibility
/// floor at 6 pt.
fn fit_size(text: &str, base: f64, max_w: f64) -> f64 {
    let w = text_width(text, base);
    if w <= max_w || w <= 0.0 {
        base
    } else {
        (base * max_w / w).max(6.0)
    }
}

/// Map to WinAnsi bytes: ASCII and Latin-1 pass through, anything else
/// becomes '?'. Field positions stay put even for unmappable input.
fn encode_winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            0x20..=0x7e => c as u8,
            0xa0..=0xff => c as u8,
            _ => b'?',
        })
        .collect()
}

fn escape_literal(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if matches!(b, b'\\' | b'(' | b')') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out
}

// --- QR overlay ---

/// Draw the verification QR as filled vector rectangles inside the fixed
/// region. Returns false (and draws nothing) when encoding fails; the
/// document is still produced without the code.
fn draw_qr(content: &mut Vec<u8>, url: &str) -> bool {
    let code = match QrCode::new(url.as_bytes()) {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(error=%e, "qr encoding failed; rendering certificate without code");
            return false;
        }
    };
    let modules = code.width();
    if modules == 0 {
        return false;
    }
    let colors = code.to_colors();
    let quiet = 4.0;
    let scale = QR_SIZE / (modules as f64 + 2.0 * quiet);

    let _ = write!(
        content,
        "1 1 1 rg {} {} {} {} re f\n0 0 0 rg\n",
        fmt2(QR_X),
        fmt2(QR_Y),
        fmt2(QR_SIZE),
        fmt2(QR_SIZE)
    );
    for row in 0..modules {
        for col in 0..modules {
            if colors[row * modules + col] == Color::Dark {
                let x = QR_X + (quiet + col as f64) * scale;
                // PDF y grows upward; QR rows grow downward
                let y = QR_Y + QR_SIZE - (quiet + row as f64 + 1.0) * scale;
                let _ = write!(
                    content,
                    "{} {} {} {} re f\n",
                    fmt2(x),
                    fmt2(y),
                    fmt2(scale),
                    fmt2(scale)
                );
            }
        }
    }
    true
}

// --- background template ---

/// Decode the configured template into raw RGB for an uncompressed image
/// XObject. Any decode failure degrades to the plain background.
fn decode_template(bytes: &[u8]) -> Option<(u32, u32, Vec<u8>)> {
    match image::load_from_memory(bytes) {
        Ok(img) => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            Some((w, h, rgb.into_raw()))
        }
        Err(e) => {
            tracing::warn!(error=%e, "template decode failed; using plain background");
            None
        }
    }
}

// --- document assembly ---

fn assemble(cert: &Certificate, content: Vec<u8>, template: Option<(u32, u32, Vec<u8>)>) -> Vec<u8> {
    let has_image = template.is_some();
    // object numbers are fixed by push order below
    let (f1, f2, content_obj) = (1usize, 2usize, 3usize);
    let image_obj = 4usize;
    let page = if has_image { 5 } else { 4 };
    let pages = page + 1;
    let catalog = pages + 1;
    let info = catalog + 1;

    let mut builder = PdfBuilder::default();
    builder.add(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );
    builder.add(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );
    builder.add(stream_object("", content));

    if let Some((w, h, raw)) = template {
        let dict = format!(
            "/Type /XObject /Subtype /Image /Width {w} /Height {h} \
             /ColorSpace /DeviceRGB /BitsPerComponent 8 "
        );
        builder.add(stream_object(&dict, raw));
    }

    let xobject = if has_image {
        format!(" /XObject << /Im0 {image_obj} 0 R >>")
    } else {
        String::new()
    };
    builder.add(
        format!(
            "<< /Type /Page /Parent {pages} 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 {f1} 0 R /F2 {f2} 0 R >>{xobject} >> \
             /Contents {content_obj} 0 R >>",
            fmt2(PAGE_W),
            fmt2(PAGE_H)
        )
        .into_bytes(),
    );
    builder.add(format!("<< /Type /Pages /Kids [{page} 0 R] /Count 1 >>").into_bytes());
    builder.add(format!("<< /Type /Catalog /Pages {pages} 0 R >>").into_bytes());

    // fixed metadata: creation date tracks the issue date, never wall-clock
    let mut info_body = b"<< /Producer (coursecert) /Title (".to_vec();
    info_body.extend_from_slice(&escape_literal(&encode_winansi(&format!(
        "Certificate {}",
        cert.certificate_id
    ))));
    info_body.extend_from_slice(b") /CreationDate (");
    info_body.extend_from_slice(creation_date(cert.issued_at).as_bytes());
    info_body.extend_from_slice(b") >>");
    builder.add(info_body);

    builder.finish(catalog, info)
}

fn creation_date(at: DateTime<Utc>) -> String {
    format!("D:{}Z", at.format("%Y%m%d%H%M%S"))
}

fn stream_object(dict_extra: &str, data: Vec<u8>) -> Vec<u8> {
    let mut obj = format!("<< {}/Length {} >>\nstream\n", dict_extra, data.len()).into_bytes();
    obj.extend_from_slice(&data);
    obj.extend_from_slice(b"\nendstream");
    obj
}

fn fmt2(v: f64) -> String {
    format!("{v:.2}")
}

#[derive(Default)]
struct PdfBuilder {
    objects: Vec<Vec<u8>>,
}

impl PdfBuilder {
    fn add(&mut self, body: Vec<u8>) -> usize {
        self.objects.push(body);
        self.objects.len()
    }

    fn finish(self, root: usize, info: usize) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(self.objects.len());
        for (i, body) in self.objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }
        let xref_pos = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", self.objects.len() + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for off in offsets {
            out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root {root} 0 R /Info {info} 0 R >>\nstartxref\n{xref_pos}\n%%EOF",
                self.objects.len() + 1
            )
            .as_bytes(),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn cert() -> Certificate {
        Certificate {
            certificate_id: "deadbeefdeadbeefdeadbeefdeadbeef".into(),
            approval_id: Uuid::nil(),
            student_id: Uuid::nil(),
            student_name: "Ada Lovelace".into(),
            guardian_name: Some("George Byron".into()),
            custom_student_id: "STU-0042".into(),
            course_title: "Analytical Engines 101".into(),
            grade: Some("A+".into()),
            issued_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
            revoked: false,
        }
    }

    fn cfg() -> RenderConfig {
        RenderConfig {
            institute_name: "Course Academy".into(),
            frontend_base_url: "https://learn.example.org".into(),
            template: None,
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn renders_a_wellformed_document_without_template() {
        let bytes = render(&cert(), &cfg());
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF"));
        assert!(contains(&bytes, b"(Ada Lovelace) Tj"));
        assert!(contains(&bytes, b"(Analytical Engines 101) Tj"));
        assert!(contains(&bytes, b"(Grade: A+) Tj"));
        assert!(contains(&bytes, b"(Certificate No. deadbeefdeadbeefdeadbeefdeadbeef) Tj"));
        assert!(contains(&bytes, b"(Issued on 14 March 2026) Tj"));
        assert!(contains(&bytes, b"(Guardian: George Byron) Tj"));
        assert!(contains(&bytes, b"/BaseFont /Helvetica-Bold"));
        // QR modules were drawn
        assert!(contains(&bytes, b"0 0 0 rg"));
        assert!(contains(&bytes, b"(Scan to verify) Tj"));
        // no template, so no image resources
        assert!(!contains(&bytes, b"/Im0"));
        assert!(contains(&bytes, b"/CreationDate (D:20260314092653Z)"));
    }

    #[test]
    fn output_is_byte_identical_across_runs() {
        let a = render(&cert(), &cfg());
        let b = render(&cert(), &cfg());
        assert_eq!(a, b);
    }

    #[test]
    fn optional_fields_are_omitted_cleanly() {
        let mut c = cert();
        c.guardian_name = None;
        c.grade = None;
        let bytes = render(&c, &cfg());
        assert!(!contains(&bytes, b"(Guardian:"));
        assert!(!contains(&bytes, b"(Grade:"));
        assert!(contains(&bytes, b"(Ada Lovelace) Tj"));
    }

    #[test]
    fn oversized_qr_payload_degrades_to_no_code() {
        let mut config = cfg();
        // far beyond any QR version capacity
        config.frontend_base_url = "x".repeat(8000);
        let bytes = render(&cert(), &config);
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(!contains(&bytes, b"(Scan to verify) Tj"));
    }

    #[test]
    fn broken_template_falls_back_to_plain_background() {
        let mut config = cfg();
        config.template = Some(vec![0u8; 64]);
        let bytes = render(&cert(), &config);
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(!contains(&bytes, b"/Im0"));
        assert!(contains(&bytes, b"(CERTIFICATE OF COMPLETION) Tj"));
    }

    #[test]
    fn valid_template_is_embedded_uncompressed() {
        // 2x1 PNG, decoded to 6 raw RGB bytes
        let mut png = Vec::new();
        {
            use image::{ImageBuffer, Rgb};
            let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
                ImageBuffer::from_fn(2, 1, |x, _| Rgb([x as u8 * 200, 10, 20]));
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                .unwrap();
        }
        let mut config = cfg();
        config.template = Some(png);
        let bytes = render(&cert(), &config);
        assert!(contains(&bytes, b"/Im0"));
        assert!(contains(&bytes, b"/Width 2 /Height 1"));
        assert!(contains(&bytes, b"/DeviceRGB"));
        // no stream filter anywhere: content stays uncompressed
        assert!(!contains(&bytes, b"/Filter"));
        // the fallback heading is not drawn over a template
        assert!(!contains(&bytes, b"(CERTIFICATE OF COMPLETION) Tj"));
    }

    #[test]
    fn parentheses_and_backslashes_are_escaped() {
        let mut c = cert();
        c.course_title = "Rust (advanced) \\ systems".into();
        let bytes = render(&c, &cfg());
        assert!(contains(&bytes, b"(Rust \\(advanced\\) \\\\ systems) Tj"));
    }

    #[test]
    fn latin1_passes_through_winansi() {
        assert_eq!(encode_winansi("café"), vec![b'c', b'a', b'f', 0xe9]);
        assert_eq!(encode_winansi("名前"), vec![b'?', b'?']);
    }

    #[test]
    fn widths_match_the_afm_table() {
        // A = 667, B = 667 at 10pt
        assert!((text_width("AB", 10.0) - 13.34).abs() < 1e-9);
        // space = 278
        assert!((text_width(" ", 1000.0) - 278.0).abs() < 1e-9);
    }

    #[test]
    fn long_values_shrink_to_their_region() {
        let long = "An Extraordinarily Comprehensive Course Title That Would Overflow";
        let fitted = fit_size(long, 34.0, STUDENT_NAME.w);
        assert!(fitted < 34.0);
        assert!(fitted >= 6.0);
        assert!(text_width(long, fitted) <= STUDENT_NAME.w + 1e-6);
    }

    #[test]
    fn centered_text_stays_inside_its_region() {
        let text = "Ada Lovelace";
        let size = fit_size(text, 34.0, STUDENT_NAME.w);
        let x = STUDENT_NAME.x + (STUDENT_NAME.w - text_width(text, size)).max(0.0) / 2.0;
        assert!(x >= STUDENT_NAME.x);
        assert!(x + text_width(text, size) <= STUDENT_NAME.x + STUDENT_NAME.w + 1e-6);
    }
}

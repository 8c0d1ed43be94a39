use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::{QrCode, render::unicode::Dense1x2};

/// Builds a WA QR payload string in the expected comma-separated format.
pub fn generate_qr_string(
    reference: &str,
    noise_pub: &[u8],
    identity_pub: &[u8],
    adv_key: &[u8],
) -> String {
    format!(
        "{reference},{},{},{}",
        STANDARD.encode(noise_pub),
        STANDARD.encode(identity_pub),
        STANDARD.encode(adv_key)
    )
}

/// Renders a QR payload as unicode blocks for a terminal.
pub fn render_qr_for_terminal(qr_payload: &str) -> Option<String> {
    let code = QrCode::new(qr_payload.as_bytes()).ok()?;
    Some(
        code.render::<Dense1x2>()
            .dark_color(Dense1x2::Light)
            .light_color(Dense1x2::Dark)
            .build(),
    )
}

/// Prints a QR payload for a user to stdout.
pub fn print_qr_in_terminal(user_id: &str, qr_payload: &str) {
    match render_qr_for_terminal(qr_payload) {
        Some(rendered) => println!("QR for {user_id}:\n{rendered}"),
        None => tracing::warn!(user_id, "qr payload could not be rendered"),
    }
}

//! Naming and content-type rules for uploaded videos.

/// MIME types accepted by the video upload endpoint.
pub const ALLOWED_VIDEO_TYPES: [&str; 6] = [
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/avi",
    "video/mov",
    "video/quicktime",
];

/// Long-lived caching for published media.
pub const MEDIA_CACHE_CONTROL: &str = "public, max-age=31536000";

pub fn is_allowed_video_type(content_type: &str) -> bool {
    ALLOWED_VIDEO_TYPES.contains(&content_type)
}

/// Use the declared type when present, otherwise guess from the filename.
pub fn normalize_content_type(content_type: Option<&str>, filename: &str) -> String {
    match content_type {
        Some(ct) if !ct.is_empty() => ct.to_string(),
        _ if filename.to_lowercase().ends_with(".mov") => "video/quicktime".to_string(),
        _ => "video/mp4".to_string(),
    }
}

/// URL-friendly slug for titles.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase().replace("università", "universita");

    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut in_space = false;
    for c in kept.chars() {
        if c.is_whitespace() {
            in_space = true;
            continue;
        }
        if in_space {
            slug.push('-');
            in_space = false;
        }
        slug.push(c);
    }
    if in_space {
        slug.push('-');
    }

    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim().to_string()
}

/// Lowercased extension of `filename`, `mp4` when there is none.
pub fn file_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
        _ => "mp4".to_string(),
    }
}

/// Object key for a video: `{prefix}/{slug(title)}.{ext}`.
pub fn video_key(prefix: &str, title: &str, filename: &str) -> String {
    let name = format!("{}.{}", slugify(title), file_extension(filename));
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Public virtual-hosted style S3 URL for an object.
pub fn public_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_matches_site_rules() {
        assert_eq!(slugify("Concorso Scuola 2025!"), "concorso-scuola-2025");
        assert_eq!(slugify("Università  di   Roma"), "universita-di-roma");
        assert_eq!(slugify("a -- b"), "a-b");
        assert_eq!(slugify("già fatto"), "gi-fatto");
    }

    #[test]
    fn content_type_falls_back_on_extension() {
        assert_eq!(normalize_content_type(None, "clip.MOV"), "video/quicktime");
        assert_eq!(normalize_content_type(Some(""), "clip.avi"), "video/mp4");
        assert_eq!(normalize_content_type(Some("video/webm"), "clip.mov"), "video/webm");
    }

    #[test]
    fn video_keys_use_slugged_title_and_extension() {
        assert_eq!(
            video_key("audios", "Intervista al Ministro", "raw_upload.MP4"),
            "audios/intervista-al-ministro.mp4"
        );
        assert_eq!(video_key("", "Clip", "noext"), "clip.mp4");
    }

    #[test]
    fn allowed_types() {
        assert!(is_allowed_video_type("video/quicktime"));
        assert!(!is_allowed_video_type("image/png"));
    }

    #[test]
    fn public_url_is_virtual_hosted() {
        assert_eq!(
            public_url("edunews-media", "eu-south-1", "audios/a.mp4"),
            "https://edunews-media.s3.eu-south-1.amazonaws.com/audios/a.mp4"
        );
    }
}

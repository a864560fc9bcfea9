use std::path::Path;

use unicode_normalization::UnicodeNormalization;

use crate::engine::ImageAttachment;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 只看扩展名，大小写不敏感
pub fn allowed_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// 把用户给的文件名收敛成安全的 ASCII 名字：
/// 路径分隔符当空格，只留字母数字和 `_.-`，空白并成 `_`，去掉首尾 `._`
pub fn sanitize_filename(filename: &str) -> String {
    // 先 NFKD 拆开，重音符号随后被 ASCII 过滤掉：ü -> u
    let spaced: String = filename
        .nfkd()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// 立即解码，解不出来就不是图片
pub fn decode_image(filename: String, bytes: Vec<u8>) -> Result<ImageAttachment, image::ImageError> {
    let format = image::guess_format(&bytes)?;
    let decoded = image::load_from_memory_with_format(&bytes, format)?;

    Ok(ImageAttachment {
        filename,
        mime_type: format.to_mime_type().to_string(),
        width: decoded.width(),
        height: decoded.height(),
        bytes,
    })
}

#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::new_rgb8(2, 3)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

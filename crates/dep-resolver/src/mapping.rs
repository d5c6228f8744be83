//! Import name to distribution package name table

/// Import roots whose installable package is known.
///
/// Covers names that differ from their distribution name as well as the
/// common chat-bot stack so those resolve without touching the interpreter.
const IMPORT_TO_PACKAGE: &[(&str, &str)] = &[
    ("telebot", "pyTelegramBotAPI"),
    ("aiogram", "aiogram"),
    ("telegram", "python-telegram-bot"),
    ("pyrogram", "pyrogram"),
    ("telethon", "telethon"),
    ("requests", "requests"),
    ("aiohttp", "aiohttp"),
    ("httpx", "httpx"),
    ("flask", "flask"),
    ("fastapi", "fastapi"),
    ("uvicorn", "uvicorn"),
    ("django", "django"),
    ("sqlalchemy", "sqlalchemy"),
    ("pandas", "pandas"),
    ("numpy", "numpy"),
    ("matplotlib", "matplotlib"),
    ("PIL", "Pillow"),
    ("cv2", "opencv-python"),
    ("sklearn", "scikit-learn"),
    ("dotenv", "python-dotenv"),
    ("bs4", "beautifulsoup4"),
    ("pytz", "pytz"),
    ("dateutil", "python-dateutil"),
    ("yaml", "PyYAML"),
    ("redis", "redis"),
    ("pymongo", "pymongo"),
    ("motor", "motor"),
    ("mysql", "mysql-connector-python"),
    ("MySQLdb", "mysqlclient"),
    ("psycopg2", "psycopg2-binary"),
    ("tortoise", "tortoise-orm"),
    ("beanie", "beanie"),
    ("pydantic", "pydantic"),
    ("lxml", "lxml"),
    ("cryptography", "cryptography"),
    ("Crypto", "pycryptodome"),
    ("jwt", "PyJWT"),
    ("magic", "python-magic"),
    ("docx", "python-docx"),
    ("fitz", "PyMuPDF"),
    ("googletrans", "googletrans"),
    ("qrcode", "qrcode"),
    ("pyTelegramBotAPI", "pyTelegramBotAPI"),
];

/// Look up the distribution package for an import root
pub fn package_for_import(root: &str) -> Option<&'static str> {
    IMPORT_TO_PACKAGE
        .iter()
        .find(|(import, _)| *import == root)
        .map(|(_, package)| *package)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renamed_packages() {
        assert_eq!(package_for_import("telebot"), Some("pyTelegramBotAPI"));
        assert_eq!(package_for_import("PIL"), Some("Pillow"));
        assert_eq!(package_for_import("bs4"), Some("beautifulsoup4"));
        assert_eq!(package_for_import("yaml"), Some("PyYAML"));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert_eq!(package_for_import("pil"), None);
        assert_eq!(package_for_import("unknown_pkg"), None);
    }
}

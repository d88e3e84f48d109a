//! 静态替代表：Python 模块名 → 安装包名、命令 → 跨平台等价命令

/// import 名与 pip 包名不一致的常见模块
const MODULE_PACKAGES: &[(&str, &str)] = &[
    ("cv2", "opencv-python"),
    ("PIL", "Pillow"),
    ("yaml", "PyYAML"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("docx", "python-docx"),
    ("pptx", "python-pptx"),
    ("dateutil", "python-dateutil"),
    ("dotenv", "python-dotenv"),
    ("fitz", "PyMuPDF"),
    ("Crypto", "pycryptodome"),
    ("jwt", "PyJWT"),
    ("serial", "pyserial"),
    ("skimage", "scikit-image"),
    ("win32api", "pywin32"),
    ("win32com", "pywin32"),
    ("attr", "attrs"),
    ("magic", "python-magic"),
];

/// 命令不存在时可尝试的等价命令（按优先级）
const COMMAND_ALTERNATIVES: &[(&str, &[&str])] = &[
    ("python3", &["python", "py"]),
    ("python", &["python3", "py"]),
    ("pip3", &["pip", "python -m pip"]),
    ("pip", &["pip3", "python3 -m pip"]),
    ("node", &["nodejs"]),
    ("nodejs", &["node"]),
    ("ls", &["dir"]),
    ("dir", &["ls"]),
    ("cat", &["type"]),
    ("type", &["cat"]),
    ("grep", &["findstr"]),
    ("findstr", &["grep"]),
    ("rm", &["del"]),
    ("del", &["rm"]),
    ("cp", &["copy"]),
    ("copy", &["cp"]),
    ("mv", &["move"]),
    ("move", &["mv"]),
    ("which", &["where"]),
    ("where", &["which"]),
    ("clear", &["cls"]),
    ("cls", &["clear"]),
    ("open", &["xdg-open", "start"]),
    ("xdg-open", &["open", "start"]),
];

/// 模块名映射为安装包名；只取顶层模块（`a.b.c` → `a`），无映射时原样返回
pub fn package_for_module(module: &str) -> String {
    let top = module.split('.').next().unwrap_or(module).trim();
    MODULE_PACKAGES
        .iter()
        .find(|(m, _)| *m == top)
        .map(|(_, p)| p.to_string())
        .unwrap_or_else(|| top.to_string())
}

/// 命令的替代列表；无条目时返回 None
pub fn alternative_commands(command: &str) -> Option<&'static [&'static str]> {
    let command = command.trim();
    COMMAND_ALTERNATIVES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(command))
        .map(|(_, alts)| *alts)
}

pub fn has_alternative(command: &str) -> bool {
    alternative_commands(command).is_some()
}

/// 将命令行首词替换为 replacement（首词不是 from 时返回 None）
pub fn substitute_command(command_line: &str, from: &str, replacement: &str) -> Option<String> {
    let trimmed = command_line.trim_start();
    let first = trimmed.split_whitespace().next()?;
    if first != from {
        return None;
    }
    Some(format!("{}{}", replacement, &trimmed[first.len()..]))
}

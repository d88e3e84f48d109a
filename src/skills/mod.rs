//! 技能系统
//!
//! 技能由沉淀引擎从成功的执行轨迹生成，安装后可被后续任务复用。
//!
//! 目录结构：
//! ```text
//! workspace/skills/
//! ├── csv/
//! │   ├── v1/
//! │   │   ├── skill.toml      # 技能清单
//! │   │   ├── SKILL.md        # 使用说明
//! │   │   ├── quality.json    # 质量门评分
//! │   │   └── scripts/        # 内联脚本（可选）
//! │   └── v2/
//! └── ...
//! ```

mod loader;

pub use loader::{
    latest_version, InstalledSkill, SkillCache, SkillLoader, SkillRegistrar, INSTRUCTIONS_FILE, MANIFEST_FILE,
};

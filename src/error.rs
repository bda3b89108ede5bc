use thiserror::Error;

/// PINNの構築・学習・評価で発生するエラー。
#[derive(Debug, Error)]
pub enum PinnError {
    #[error("入力変数 '{name}' が重複しています")]
    DuplicateVariable { name: String },

    #[error("変数 '{name}' はモデルの入力として宣言されていません")]
    UnknownVariable { name: String },

    #[error("関数 '{found}' はこのモデルの関数 '{expected}' ではありません")]
    UnknownField { expected: String, found: String },

    #[error("{order}階の偏微分には対応していません (最大2階)")]
    UnsupportedOrder { order: usize },

    #[error("残差 '{name}' はモデルにありません")]
    UnknownResidual { name: String },

    #[error("入力 '{name}' の座標列がありません")]
    MissingInput { name: String },

    #[error("入力 '{name}' はモデルの変数ではありません")]
    UnexpectedInput { name: String },

    #[error("入力 '{name}' の長さ {found} が他の列の長さ {expected} と一致しません")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("ネットワークの入力幅 {found} が場の入力数 {expected} と一致しません")]
    InputWidth { expected: usize, found: usize },

    #[error("残差の数 {residuals} とターゲットの数 {targets} が一致しません")]
    TargetCount { residuals: usize, targets: usize },

    #[error("空のデータセットでは学習・評価できません")]
    EmptyDataset,

    #[error("不正な設定です: {reason}")]
    InvalidConfig { reason: String },

    #[error("エポック {epoch} で損失が有限値ではなくなりました")]
    NonFiniteLoss { epoch: usize },

    #[error("設定ファイルの読み書きに失敗しました: {0}")]
    Config(String),

    #[error("モデルファイルの読み書きに失敗しました")]
    Record(#[from] burn::record::RecorderError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Fixed prompt templates for the correction and summarization stages.

/// System prompt for the context-correction pass over the raw transcript.
pub const CORRECT_SYSTEM_PROMPT: &str = r#"あなたは会議の音声書き起こしを校正する専門家です。入力は音声認識の生の出力です。

## ルール
- 誤認識された単語を文脈から判断して修正する
- 句読点を適切に補い、読みやすい文章にする
- フィラー（「えー」「あのー」「まあ」など)を取り除く
- 発言の意味・内容・順序は変えない
- 要約や省略はしない
- 修正後のテキストのみを出力する。説明や前置きは一切書かない"#;

/// System prompt for the minutes-generation pass. The headings are a fixed
/// contract; the parser in `minutes` splits on exactly these.
pub const SUMMARIZE_SYSTEM_PROMPT: &str = r#"あなたは会議の議事録を作成する専門家です。校正済みの会議の書き起こしから、以下の形式のMarkdownで議事録を作成してください。

# 要約
（会議全体の要約を1段落で）

## 議題・議論内容
- （議題や議論された内容を箇条書き）

## 決定事項
- （決定された事項を箇条書き）

## ToDo
- [ ] （タスクを担当者付きで箇条書き）

## 次のアクション
- （次に取るべきアクションを箇条書き）

## 次回会議
（次回会議の予定。言及がなければ空欄）

## 注意
- 見出しは上記のものを一字一句そのまま使うこと
- 書き起こしに含まれない情報を追加しないこと
- Markdown以外の出力（前置き、コードブロック）をしないこと"#;

pub fn correct_user_prompt(raw_transcript: &str) -> String {
    format!("以下の書き起こしを校正してください。\n\n{raw_transcript}")
}

pub fn summarize_user_prompt(corrected_transcript: &str) -> String {
    format!("以下の会議の書き起こしから議事録を作成してください。\n\n{corrected_transcript}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_prompt_pins_all_headings() {
        for heading in [
            "# 要約",
            "## 議題・議論内容",
            "## 決定事項",
            "## ToDo",
            "## 次のアクション",
            "## 次回会議",
        ] {
            assert!(
                SUMMARIZE_SYSTEM_PROMPT.contains(heading),
                "missing heading {heading}"
            );
        }
    }

    #[test]
    fn test_user_prompts_embed_transcript() {
        assert!(correct_user_prompt("会議を始めます").contains("会議を始めます"));
        assert!(summarize_user_prompt("予算は承認された").contains("予算は承認された"));
    }
}

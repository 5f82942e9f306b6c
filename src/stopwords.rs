use std::{collections::HashSet, sync::LazyLock};

/// Spanish and English stopwords, already lowercased and stripped of
/// diacritics so they compare against normalized tokens.
const STOPWORDS: &[&str] = &[
    // Spanish
    "a", "al", "algo", "alguna", "algunas", "alguno", "algunos", "alli",
    "ante", "antes", "aquel", "aquella", "aquellas", "aquellos", "aqui",
    "asi", "aunque", "bajo", "bien", "cabe", "cada", "como", "con", "contra",
    "cual", "cuales", "cuando", "cuanto", "cuya", "cuyo", "de", "del",
    "desde", "despues", "dicha", "dichas", "dicho", "dichos", "donde",
    "durante", "e", "el", "ella", "ellas", "ello", "ellos", "en", "entonces",
    "entre", "era", "eran", "es", "esa", "esas", "ese", "eso", "esos", "esta",
    "estaba", "estaban", "estado", "estamos", "estan", "estar", "estas",
    "este", "esto", "estos", "estoy", "fue", "fueron", "ha", "haber", "habia",
    "habian", "hace", "hacen", "hacer", "hacia", "han", "has", "hasta", "hay",
    "he", "hemos", "la", "las", "le", "les", "lo", "los", "luego", "mas",
    "me", "mediante", "menos", "mi", "mientras", "mis", "misma", "mismas",
    "mismo", "mismos", "mucha", "muchas", "mucho", "muchos", "muy", "nada",
    "ni", "ninguna", "ninguno", "no", "nos", "nosotras", "nosotros",
    "nuestra", "nuestras", "nuestro", "nuestros", "nunca", "o", "otra",
    "otras", "otro", "otros", "para", "pero", "poca", "pocas", "poco",
    "pocos", "por", "porque", "puede", "pueden", "que", "quien", "quienes",
    "se", "sea", "sean", "segun", "sera", "seran", "ser", "si", "sido",
    "siempre", "siendo", "sin", "sino", "sobre", "sola", "solo", "son", "su",
    "sus", "suya", "suyas", "suyo", "suyos", "tal", "tales", "tambien",
    "tanta", "tantas", "tanto", "tantos", "te", "tiene", "tienen", "tener",
    "toda", "todas", "todo", "todos", "tras", "tu", "tus", "u", "un", "una",
    "unas", "uno", "unos", "usted", "ustedes", "vosotras", "vosotros",
    "vuestra", "vuestro", "ya", "yo",
    // English
    "about", "above", "after", "again", "against", "all", "also", "and",
    "any", "are", "because", "been", "before", "being", "below", "between",
    "both", "but", "can", "could", "did", "does", "doing", "down", "during",
    "each", "few", "for", "from", "further", "had", "has", "have", "having",
    "her", "here", "hers", "herself", "him", "himself", "his", "how", "into",
    "its", "itself", "just", "more", "most", "myself", "nor", "not", "off",
    "once", "only", "other", "ours", "ourselves", "out", "over", "own",
    "same", "she", "should", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "too", "under", "until", "upon", "very", "was",
    "were", "what", "when", "where", "which", "while", "who", "whom",
    "whose", "why", "will", "with", "would", "you", "your", "yours",
    "yourself", "yourselves",
];

static STOPWORD_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOPWORDS.iter().copied().collect());

/// Returns true if `word` (normalized) is a stopword in either language.
pub fn is_stopword(word: &str) -> bool {
    STOPWORD_SET.contains(word)
}

/// Every stopword, for analyzers that filter them at index time.
pub fn words() -> impl Iterator<Item = &'static str> {
    STOPWORDS.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_languages_present() {
        assert!(is_stopword("para"));
        assert!(is_stopword("tambien"));
        assert!(is_stopword("the"));
        assert!(is_stopword("because"));
    }

    #[test]
    fn content_words_are_not_stopwords() {
        assert!(!is_stopword("contrato"));
        assert!(!is_stopword("invoice"));
    }
}

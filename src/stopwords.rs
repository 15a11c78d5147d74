//! English stopwords removed before tagging.
//!
//! Covers pronouns, auxiliaries, determiners, prepositions, common adverbs,
//! and the fragments that contractions split into once apostrophes are
//! treated as separators ("wouldn't" -> "wouldn", "t").

pub const ENGLISH: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again",
    "against", "all", "almost", "alone", "along", "already", "also",
    "although", "always", "am", "among", "amongst", "amount", "an", "and",
    "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere",
    "are", "aren", "around", "as", "at", "back", "be", "became", "because",
    "become", "becomes", "becoming", "been", "before", "beforehand",
    "behind", "being", "below", "beside", "besides", "between", "beyond",
    "both", "bottom", "but", "by", "ca", "call", "can", "cannot", "could",
    "couldn", "d", "did", "didn", "do", "does", "doesn", "doing", "don",
    "done", "down", "due", "during", "each", "eight", "either", "eleven",
    "else", "elsewhere", "empty", "enough", "even", "ever", "every",
    "everyone", "everything", "everywhere", "except", "few", "fifteen",
    "fifty", "first", "five", "for", "former", "formerly", "forty", "four",
    "from", "front", "full", "further", "get", "give", "go", "had", "hadn",
    "has", "hasn", "have", "haven", "having", "he", "hence", "her", "here",
    "hereafter", "hereby", "herein", "hereupon", "hers", "herself", "him",
    "himself", "his", "how", "however", "hundred", "i", "if", "in",
    "indeed", "into", "is", "isn", "it", "its", "itself", "just", "keep",
    "last", "latter", "latterly", "least", "less", "ll", "m", "made",
    "make", "many", "may", "me", "meanwhile", "might", "mightn", "mine",
    "more", "moreover", "most", "mostly", "move", "much", "must", "mustn",
    "my", "myself", "n", "name", "namely", "needn", "neither", "never",
    "nevertheless", "next", "nine", "no", "nobody", "none", "noone", "nor",
    "not", "nothing", "now", "nowhere", "o", "of", "off", "often", "on",
    "once", "one", "only", "onto", "or", "other", "others", "otherwise",
    "our", "ours", "ourselves", "out", "over", "own", "part", "per",
    "perhaps", "please", "put", "quite", "rather", "re", "really",
    "regarding", "s", "same", "say", "see", "seem", "seemed", "seeming",
    "seems", "serious", "several", "shan", "she", "should", "shouldn",
    "show", "side", "since", "six", "sixty", "so", "some", "somehow",
    "someone", "something", "sometime", "sometimes", "somewhere", "still",
    "such", "t", "take", "ten", "than", "that", "the", "their", "theirs",
    "them", "themselves", "then", "thence", "there", "thereafter",
    "thereby", "therefore", "therein", "thereupon", "these", "they",
    "third", "this", "those", "though", "three", "through", "throughout",
    "thru", "thus", "to", "together", "too", "top", "toward", "towards",
    "twelve", "twenty", "two", "under", "unless", "until", "up", "upon",
    "us", "used", "using", "various", "ve", "very", "via", "was", "wasn",
    "we", "well", "were", "weren", "what", "whatever", "when", "whence",
    "whenever", "where", "whereafter", "whereas", "whereby", "wherein",
    "whereupon", "wherever", "whether", "which", "while", "whither", "who",
    "whoever", "whole", "whom", "whose", "why", "will", "with", "within",
    "without", "won", "would", "wouldn", "y", "yet", "you", "your", "yours",
    "yourself", "yourselves",
];
